//! Error taxonomy for the service boundary.
//!
//! Three conditions are worth a distinct type: user-correctable input
//! errors (400), transient provider failures that survived retry (retry
//! suggested), and configuration errors raised once at construction.
//! Parse failures from the LLM are never represented here; they are
//! absorbed by the parser cascade and fallback generation. Vector-backend
//! outages are logged and degraded around, not surfaced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReqforgeError {
    /// Missing or empty user input, including a journey with no indexed
    /// requirement documents. Not retried.
    #[error("{0}")]
    UserInput(String),

    /// A provider error that exhausted its retry budget. The message is
    /// already classified into user-facing wording.
    #[error("{message}")]
    TransientProvider { message: String, retry_suggested: bool },

    /// Missing credential or invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    FatalConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReqforgeError {
    pub fn no_requirements(journey: &str) -> Self {
        ReqforgeError::UserInput(format!(
            "No requirement documents found for journey: {journey}. \
             Upload documents before generating test cases."
        ))
    }

    /// Classify a raw provider failure into a user-facing transient error.
    /// Substrings follow the upstream providers' wording for rate limits,
    /// server errors, and connection problems.
    pub fn classify_provider(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        let message = if lower.contains("429") || lower.contains("rate limit") {
            "The language model is rate-limited right now. Please retry in a moment."
        } else if lower.contains("timeout") || lower.contains("timed out") {
            "The language model took too long to respond. Please retry."
        } else if lower.contains("connect") || lower.contains("connection") {
            "Could not reach the language model service. Please retry."
        } else if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("server error")
        {
            "The language model service is having trouble. Please retry."
        } else {
            return ReqforgeError::TransientProvider {
                message: format!("Language model request failed: {raw}"),
                retry_suggested: false,
            };
        };
        ReqforgeError::TransientProvider {
            message: message.to_string(),
            retry_suggested: true,
        }
    }

    pub fn retry_suggested(&self) -> bool {
        matches!(
            self,
            ReqforgeError::TransientProvider {
                retry_suggested: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let err = ReqforgeError::classify_provider("HTTP 429 Too Many Requests");
        assert!(err.retry_suggested());
        assert!(err.to_string().contains("rate-limited"));
    }

    #[test]
    fn test_classify_timeout() {
        let err = ReqforgeError::classify_provider("request timed out after 60s");
        assert!(err.retry_suggested());
    }

    #[test]
    fn test_classify_server_error() {
        let err = ReqforgeError::classify_provider("API error 503: overloaded");
        assert!(err.retry_suggested());
    }

    #[test]
    fn test_classify_non_retryable() {
        let err = ReqforgeError::classify_provider("invalid api key");
        assert!(!err.retry_suggested());
    }

    #[test]
    fn test_no_requirements_names_journey() {
        let err = ReqforgeError::no_requirements("Payment Processing");
        assert!(err.to_string().contains("Payment Processing"));
    }
}
