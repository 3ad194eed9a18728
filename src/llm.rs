//! LLM provider contract and HTTP implementation.
//!
//! Defines the minimal provider surface the rest of the system depends
//! on ([`LlmProvider::complete`], [`LlmProvider::embed`], and
//! [`LlmProvider::rerank`]) plus [`HttpLlmProvider`] for any
//! OpenAI-compatible API.
//!
//! # Retry Strategy
//!
//! Transient failures (HTTP 429, 5xx, connection errors, timeouts) are
//! retried with exponential backoff plus jitter:
//! `base_delay × 2^attempt + uniform(0, 1s)`, up to `max_retries`
//! attempts. Client errors other than 429 fail immediately.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::ReqforgeError;

/// One chat message in provider wire format.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// The minimal contract every language-model backend must satisfy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Chat completion; returns the assistant's text.
    async fn complete(&self, messages: &[Message], model: &str, temperature: f32)
        -> Result<String>;

    /// Batch embedding; one vector per input, in input order.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>>;

    /// Rerank candidates against a query; returns a permutation of
    /// `0..candidates.len()` ordered most-relevant first.
    async fn rerank(&self, query: &str, candidates: &[String], model: &str) -> Result<Vec<usize>>;
}

/// A failed provider call, tagged with whether it is worth retrying.
#[derive(Debug)]
pub struct ProviderCallError {
    pub message: String,
    pub retryable: bool,
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderCallError {}

/// Retry policy for provider calls. Delays double each attempt with up to
/// one second of jitter on top.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * 2u32.saturating_pow(attempt);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        backoff + jitter
    }
}

/// Run `op` up to `policy.max_retries` times, sleeping between attempts.
///
/// Non-retryable errors propagate immediately; a retryable error on the
/// final attempt propagates as-is.
pub async fn retry_request<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ProviderCallError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderCallError>>,
{
    let attempts = policy.max_retries.max(1);
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop returns on final attempt")
}

/// Provider for any OpenAI-compatible chat/embeddings API.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    policy: RetryPolicy,
}

impl HttpLlmProvider {
    /// Construct the provider, resolving the API key once.
    ///
    /// A missing key is a [`ReqforgeError::FatalConfig`]: raised here at
    /// construction, never per-request.
    pub fn new(config: &LlmConfig) -> Result<Self, ReqforgeError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ReqforgeError::FatalConfig(format!(
                "{} environment variable is required",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReqforgeError::FatalConfig(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            max_tokens: config.max_tokens,
            policy: RetryPolicy::from_config(config),
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderCallError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderCallError {
                // reqwest connect/timeout errors are transient by nature.
                retryable: e.is_connect() || e.is_timeout(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| ProviderCallError {
                message: format!("invalid JSON from provider: {e}"),
                retryable: false,
            });
        }

        let body_text = resp.text().await.unwrap_or_default();
        Err(ProviderCallError {
            retryable: status.as_u16() == 429 || status.is_server_error(),
            message: format!("provider error {status}: {body_text}"),
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f32,
    ) -> Result<String> {
        let body = json!({
            "model": model,
            "temperature": temperature,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });

        let response = retry_request(self.policy, || self.post_json("/chat/completions", &body))
            .await
            .map_err(|e| anyhow!(e.message))?;

        response
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("provider response missing message content"))
    }

    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": model,
            "input": texts,
        });

        let response = retry_request(self.policy, || self.post_json("/embeddings", &body))
            .await
            .map_err(|e| anyhow!(e.message))?;

        let data = response
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow!("provider response missing data array"))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let values = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow!("provider response missing embedding"))?;
            embeddings.push(
                values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }
        Ok(embeddings)
    }

    async fn rerank(&self, query: &str, candidates: &[String], model: &str) -> Result<Vec<usize>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Rank the following candidates by relevance to the query: \"{query}\"\n\n\
             Candidates:\n{listing}\n\n\
             Respond with only the candidate numbers in order of relevance, \
             most relevant first, separated by commas. For example: 3,1,2"
        );

        let response = self.complete(&[Message::user(prompt)], model, 0.1).await?;
        Ok(parse_ranking(&response, candidates.len()))
    }
}

/// Extract a permutation from a free-text ranking response.
///
/// Falls back to the identity order when the response does not contain a
/// usable ranking; rerank degrades, it never fails the search.
pub fn parse_ranking(response: &str, n: usize) -> Vec<usize> {
    let mut seen = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut current = String::new();
    for ch in response.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if !current.is_empty() {
            if let Ok(v) = current.parse::<usize>() {
                if v >= 1 && v <= n && !seen[v - 1] {
                    seen[v - 1] = true;
                    order.push(v - 1);
                }
            }
            current.clear();
        }
    }

    if order.len() != n {
        return (0..n).collect();
    }
    order
}

#[cfg(test)]
pub mod test_support {
    //! Canned provider for unit tests across the crate.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubProvider {
        responses: Mutex<VecDeque<Result<String, String>>>,
        embeddings: Mutex<Option<Vec<Vec<f32>>>>,
        pub calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Default::default()
            }
        }

        pub fn with_embeddings(self, embeddings: Vec<Vec<f32>>) -> Self {
            *self.embeddings.lock().unwrap() = Some(embeddings);
            self
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _model: &str,
            _temperature: f32,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(anyhow!(msg)),
                None => Ok(String::new()),
            }
        }

        async fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>> {
            match self.embeddings.lock().unwrap().clone() {
                Some(vectors) => Ok(vectors),
                None => Ok(texts.iter().map(|_| vec![0.0; 4]).collect()),
            }
        }

        async fn rerank(
            &self,
            _query: &str,
            candidates: &[String],
            _model: &str,
        ) -> Result<Vec<usize>> {
            Ok((0..candidates.len()).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };

        let result = retry_request(policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderCallError {
                        message: "503".to_string(),
                        retryable: true,
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_attempts_exactly_max_retries() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(20),
        };

        let start = Instant::now();
        let result: Result<(), _> = retry_request(policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderCallError {
                    message: "provider error 503".to_string(),
                    retryable: true,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two sleeps: 20ms + 40ms minimum, jitter on top.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
        };

        let result: Result<(), _> = retry_request(policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderCallError {
                    message: "provider error 401".to_string(),
                    retryable: false,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_ranking_valid_permutation() {
        assert_eq!(parse_ranking("3,1,2", 3), vec![2, 0, 1]);
        assert_eq!(parse_ranking("Ranking: 2, 1", 2), vec![1, 0]);
    }

    #[test]
    fn test_parse_ranking_ignores_duplicates_and_out_of_range() {
        // 5 is out of range and 1 repeats; the result is not a full
        // permutation, so identity order wins.
        assert_eq!(parse_ranking("1,1,5", 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_ranking_garbage_falls_back_to_identity() {
        assert_eq!(parse_ranking("no numbers here", 4), vec![0, 1, 2, 3]);
    }
}
