//! Vector storage abstraction.
//!
//! Two implementations of one [`VectorStore`] contract, selected once at
//! construction:
//!
//! - **[`RemoteVectorStore`]**: namespace-scoped HTTP backend (cosine
//!   metric, metadata filters).
//! - **[`InMemoryVectorStore`]**: linear-scan cosine search over an
//!   in-process map, with the same filter semantics. Used as the degraded
//!   mode when no remote backend is configured or the remote one fails.
//!
//! Filter semantics: exact match on scalar fields, `{"field": {"in":
//! [v1, v2]}}` for set membership. A record missing a filtered field is
//! excluded. Result ranking is by descending similarity; in the in-memory
//! store ties keep insertion order (stable sort); callers may not rely
//! on tie order matching the remote backend.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::VectorConfig;
use crate::embedding::cosine_similarity;
use crate::error::ReqforgeError;
use crate::models::{Metadata, VectorMatch, VectorRecord};

/// One condition of a metadata filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterCond {
    /// Set membership: `{"in": [v1, v2]}`.
    In {
        #[serde(rename = "in")]
        values: Vec<Value>,
    },
    /// Exact match on a scalar value.
    Eq(Value),
}

/// Exact-match / set-membership metadata filter, ANDed across fields.
pub type Filter = BTreeMap<String, FilterCond>;

/// Build a single-field exact-match filter.
pub fn filter_eq(field: &str, value: impl Into<Value>) -> Filter {
    let mut f = Filter::new();
    f.insert(field.to_string(), FilterCond::Eq(value.into()));
    f
}

/// True when `metadata` satisfies every condition in `filter`.
pub fn matches_filter(metadata: &Metadata, filter: &Filter) -> bool {
    filter.iter().all(|(field, cond)| {
        let Some(value) = metadata.get(field) else {
            return false;
        };
        match cond {
            FilterCond::Eq(expected) => value == expected,
            FilterCond::In { values } => values.contains(value),
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_count: usize,
    pub dimension: usize,
    pub namespaces: BTreeMap<String, usize>,
}

/// Namespace-scoped vector storage with metadata filtering.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id. Re-upserting an id overwrites it.
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize>;

    /// Top-`top_k` records by cosine similarity, descending.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete_ids(&self, ids: &[String], namespace: &str) -> Result<usize>;

    async fn delete_by_filter(&self, filter: &Filter, namespace: &str) -> Result<usize>;

    async fn clear_namespace(&self, namespace: &str) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}

// ============ In-memory store ============

/// Linear-scan store backing degraded mode and tests.
///
/// Concurrent searches snapshot the candidate set under the read lock
/// before scoring, so upserts running alongside never corrupt iteration.
pub struct InMemoryVectorStore {
    dimension: usize,
    namespaces: RwLock<BTreeMap<String, Vec<VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        let count = records.len();
        let mut namespaces = self.namespaces.write().expect("vector store lock poisoned");
        let bucket = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            match bucket.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => bucket.push(record),
            }
        }
        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorMatch>> {
        let candidates: Vec<VectorRecord> = {
            let namespaces = self.namespaces.read().expect("vector store lock poisoned");
            let Some(bucket) = namespaces.get(namespace) else {
                return Ok(Vec::new());
            };
            bucket
                .iter()
                .filter(|r| filter.map_or(true, |f| matches_filter(&r.metadata, f)))
                .cloned()
                .collect()
        };

        let mut matches: Vec<VectorMatch> = candidates
            .into_iter()
            .map(|r| VectorMatch {
                score: cosine_similarity(query, &r.embedding),
                id: r.id,
                metadata: r.metadata,
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_ids(&self, ids: &[String], namespace: &str) -> Result<usize> {
        let mut namespaces = self.namespaces.write().expect("vector store lock poisoned");
        let Some(bucket) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|r| !ids.contains(&r.id));
        Ok(before - bucket.len())
    }

    async fn delete_by_filter(&self, filter: &Filter, namespace: &str) -> Result<usize> {
        let mut namespaces = self.namespaces.write().expect("vector store lock poisoned");
        let Some(bucket) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|r| !matches_filter(&r.metadata, filter));
        Ok(before - bucket.len())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let mut namespaces = self.namespaces.write().expect("vector store lock poisoned");
        Ok(namespaces.remove(namespace).map(|b| b.len()).unwrap_or(0))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let namespaces = self.namespaces.read().expect("vector store lock poisoned");
        let per_ns: BTreeMap<String, usize> = namespaces
            .iter()
            .map(|(ns, bucket)| (ns.clone(), bucket.len()))
            .collect();
        Ok(StoreStats {
            total_count: per_ns.values().sum(),
            dimension: self.dimension,
            namespaces: per_ns,
        })
    }
}

// ============ Remote store ============

/// HTTP vector backend speaking a Pinecone-style REST API.
pub struct RemoteVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    dimension: usize,
}

impl RemoteVectorStore {
    /// Missing base URL or credential is a construction-time failure, not
    /// a per-request one.
    pub fn new(config: &VectorConfig, dimension: usize) -> Result<Self, ReqforgeError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ReqforgeError::FatalConfig("vector.base_url is required".to_string()))?;
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
            base_url,
            api_key,
            dimension,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("vector backend error {status}: {text}"));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl VectorStore for RemoteVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        let vectors: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "values": r.embedding,
                    "metadata": r.metadata,
                })
            })
            .collect();
        let response = self
            .post(
                "/vectors/upsert",
                json!({ "namespace": namespace, "vectors": vectors }),
            )
            .await?;
        Ok(response
            .get("upsertedCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(records.len() as u64) as usize)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorMatch>> {
        let mut body = json!({
            "namespace": namespace,
            "vector": query,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(f) = filter {
            body["filter"] = remote_filter(f);
        }

        let response = self.post("/query", body).await?;
        let matches = response
            .get("matches")
            .and_then(|m| m.as_array())
            .ok_or_else(|| anyhow!("vector backend response missing matches"))?;

        Ok(matches
            .iter()
            .map(|m| VectorMatch {
                id: m.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                score: m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
                metadata: m
                    .get("metadata")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_ids(&self, ids: &[String], namespace: &str) -> Result<usize> {
        self.post(
            "/vectors/delete",
            json!({ "namespace": namespace, "ids": ids }),
        )
        .await?;
        Ok(ids.len())
    }

    async fn delete_by_filter(&self, filter: &Filter, namespace: &str) -> Result<usize> {
        // The backend has no filtered delete: query ids first, then delete.
        let zero = vec![0.0f32; self.dimension];
        let matches = self.search(&zero, 10_000, namespace, Some(filter)).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = matches.into_iter().map(|m| m.id).collect();
        self.delete_ids(&ids, namespace).await
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        self.post(
            "/vectors/delete",
            json!({ "namespace": namespace, "deleteAll": true }),
        )
        .await?;
        Ok(0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let response = self.post("/describe_index_stats", json!({})).await?;
        let namespaces: BTreeMap<String, usize> = response
            .get("namespaces")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .map(|(ns, stats)| {
                        let count = stats
                            .get("vectorCount")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as usize;
                        (ns.clone(), count)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(StoreStats {
            total_count: response
                .get("totalVectorCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            dimension: response
                .get("dimension")
                .and_then(|v| v.as_u64())
                .unwrap_or(self.dimension as u64) as usize,
            namespaces,
        })
    }
}

/// Translate the internal filter into the backend's `$eq`/`$in` syntax.
fn remote_filter(filter: &Filter) -> Value {
    let mut out = serde_json::Map::new();
    for (field, cond) in filter {
        let v = match cond {
            FilterCond::Eq(value) => value.clone(),
            FilterCond::In { values } => json!({ "$in": values }),
        };
        out.insert(field.clone(), v);
    }
    Value::Object(out)
}
