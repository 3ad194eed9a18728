//! Retrieval-augmented generation service.
//!
//! Composes the chunker, embedding service, and vector stores into the
//! two operations the rest of the system sees: [`RagService::index_text`]
//! and [`RagService::search`]. Owns namespace selection (journey, or
//! `"default"`), metadata-filter plumbing, and the degraded-mode switch:
//! when the remote vector backend fails, the operation is retried against
//! the in-memory store and the outcome is flagged `storage: "memory"`.
//! Degradation is a warning, never an error.
//!
//! Tenant isolation lives here: every journey is its own namespace, so a
//! search filtered to one journey can never see another journey's chunks.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingService;
use crate::llm::LlmProvider;
use crate::models::{Evidence, IndexOutcome, Metadata, VectorMatch, VectorRecord};
use crate::vector::{Filter, FilterCond, InMemoryVectorStore, StoreStats, VectorStore};

pub const DEFAULT_NAMESPACE: &str = "default";

pub struct RagService {
    embedder: EmbeddingService,
    llm: Arc<dyn LlmProvider>,
    remote: Option<Arc<dyn VectorStore>>,
    memory: Arc<InMemoryVectorStore>,
    chunk_size: usize,
    overlap: usize,
    rerank_model: String,
}

impl RagService {
    /// Build the service with an optional remote store. The in-memory
    /// store always exists; it is the fallback target, not a lazy
    /// afterthought.
    pub fn new(
        config: &Config,
        llm: Arc<dyn LlmProvider>,
        remote: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            embedder: EmbeddingService::new(llm.clone(), &config.embedding),
            llm,
            remote,
            memory: Arc::new(InMemoryVectorStore::new(config.embedding.dims)),
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            rerank_model: config.llm.default_model.clone(),
        }
    }

    /// Chunk, embed, and index one document's text.
    ///
    /// `metadata` must carry `document_id`; `journey` selects the
    /// namespace. Every chunk's record carries the full document metadata
    /// plus `text`, `chunk_index`, and `total_chunks`.
    pub async fn index_text(&self, text: &str, metadata: &Metadata) -> Result<IndexOutcome> {
        let chunks = chunk_text(text, self.chunk_size, self.overlap);
        let embeddings = self.embedder.embed(&chunks).await;

        let document_id = metadata
            .get("document_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let total = chunks.len();

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                let mut record_meta = metadata.clone();
                record_meta.retain(|_, v| !v.is_null());
                record_meta.insert("text".to_string(), json!(chunk));
                record_meta.insert("chunk_index".to_string(), json!(i));
                record_meta.insert("total_chunks".to_string(), json!(total));
                VectorRecord {
                    id: format!("{document_id}_{i}"),
                    embedding,
                    metadata: record_meta,
                }
            })
            .collect();

        let namespace = namespace_of(metadata);
        let count = records.len();

        if let Some(remote) = &self.remote {
            match remote.upsert(records.clone(), &namespace).await {
                Ok(upserted) => {
                    info!(chunks = upserted, namespace = %namespace, "indexed via remote store");
                    return Ok(IndexOutcome {
                        status: "success".to_string(),
                        chunks_indexed: upserted,
                        storage: "remote".to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "remote vector store unavailable, indexing in memory");
                }
            }
        }

        self.memory.upsert(records, &namespace).await?;
        info!(chunks = count, namespace = %namespace, "indexed via in-memory store");
        Ok(IndexOutcome {
            status: "success".to_string(),
            chunks_indexed: count,
            storage: "memory".to_string(),
        })
    }

    /// Embed the query and return scored evidence, best first. Scores are
    /// carried through from the store unmodified.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Evidence>> {
        let query_vec = self.embedder.embed_single(query).await;
        let namespace = filter.map(namespace_of_filter).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let matches = if let Some(remote) = &self.remote {
            match remote.search(&query_vec, top_k, &namespace, filter).await {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(error = %e, "remote vector search failed, using in-memory store");
                    self.memory.search(&query_vec, top_k, &namespace, filter).await?
                }
            }
        } else {
            self.memory.search(&query_vec, top_k, &namespace, filter).await?
        };

        Ok(matches.into_iter().map(evidence_from_match).collect())
    }

    /// Rerank evidence with the LLM; input order survives any failure.
    pub async fn rerank(&self, query: &str, candidates: Vec<Evidence>, top_k: usize) -> Vec<Evidence> {
        if candidates.is_empty() {
            return candidates;
        }
        let texts: Vec<String> = candidates.iter().map(|e| e.text.clone()).collect();
        match self.llm.rerank(query, &texts, &self.rerank_model).await {
            Ok(order) => {
                let mut slots: Vec<Option<Evidence>> = candidates.into_iter().map(Some).collect();
                let mut ranked: Vec<Evidence> = order
                    .into_iter()
                    .filter_map(|i| slots.get_mut(i).and_then(|s| s.take()))
                    .collect();
                ranked.truncate(top_k);
                ranked
            }
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping retrieval order");
                let mut kept = candidates;
                kept.truncate(top_k);
                kept
            }
        }
    }

    /// Delete vectors matching `filter` in the journey's namespace, or
    /// clear the whole namespace when no filter is given.
    pub async fn clear(&self, namespace: &str, filter: Option<&Filter>) -> Result<usize> {
        let from_remote = if let Some(remote) = &self.remote {
            let result = match filter {
                Some(f) => remote.delete_by_filter(f, namespace).await,
                None => remote.clear_namespace(namespace).await,
            };
            match result {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "remote vector delete failed, clearing in-memory store only");
                    0
                }
            }
        } else {
            0
        };

        let from_memory = match filter {
            Some(f) => self.memory.delete_by_filter(f, namespace).await?,
            None => self.memory.clear_namespace(namespace).await?,
        };
        Ok(from_remote + from_memory)
    }

    /// Stats from the remote store when reachable, otherwise the
    /// in-memory fallback's view.
    pub async fn stats(&self) -> Result<(StoreStats, String)> {
        if let Some(remote) = &self.remote {
            match remote.stats().await {
                Ok(stats) => return Ok((stats, "remote".to_string())),
                Err(e) => {
                    warn!(error = %e, "remote vector stats failed, reporting in-memory store");
                }
            }
        }
        Ok((self.memory.stats().await?, "memory".to_string()))
    }
}

fn evidence_from_match(m: VectorMatch) -> Evidence {
    let text = m
        .metadata
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Evidence {
        text,
        metadata: m.metadata,
        score: m.score,
    }
}

fn namespace_of(metadata: &Metadata) -> String {
    metadata
        .get("journey")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

fn namespace_of_filter(filter: &Filter) -> String {
    match filter.get("journey") {
        Some(FilterCond::Eq(v)) => v.as_str().unwrap_or(DEFAULT_NAMESPACE).to_string(),
        _ => DEFAULT_NAMESPACE.to_string(),
    }
}
