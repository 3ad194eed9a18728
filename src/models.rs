//! Core data models used throughout reqforge.
//!
//! These types represent the vector records, versions, evidence, and
//! test cases that flow through the ingestion, retrieval, and generation
//! pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat string-keyed metadata attached to a vector record. BTreeMap keeps
/// serialization order stable for tests and logs.
pub type Metadata = BTreeMap<String, Value>;

/// An embedded chunk as stored in the vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// One ranked hit from a vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    pub metadata: Metadata,
}

/// A scored chunk returned by search, the grounding unit for synthesis.
/// Ephemeral: produced by search, consumed immediately, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub metadata: Metadata,
    pub score: f64,
}

impl Evidence {
    pub fn meta_str(&self, key: &str) -> &str {
        self.metadata.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }
}

/// One entry of a journey's append-only version timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    pub journey: String,
    pub source_type: String,
    pub document_uri: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub effective_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Positive,
    Negative,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Steps may come back from the model as a single string or a list;
/// both shapes are accepted and preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Steps {
    One(String),
    Many(Vec<String>),
}

/// A generated test case. `test_case_name` is unique within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub test_case_name: String,
    pub preconditions: String,
    pub steps: Steps,
    pub expected_result: String,
    #[serde(default)]
    pub actual_result: String,
    pub test_type: TestType,
    pub test_case_id: String,
    pub priority: Priority,
    pub journey: String,
    pub requirement_reference: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "Not Executed".to_string()
}

/// Result envelope for a paginated generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub status: String,
    pub journey: String,
    pub test_cases: Vec<TestCase>,
    pub page: usize,
    pub has_next_page: bool,
    pub total_pages: usize,
    pub total_available: usize,
    pub context_used: String,
    pub model_used: String,
}

/// Outcome of indexing one document's text.
#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    pub status: String,
    pub chunks_indexed: usize,
    /// `"remote"` when the vector backend took the write, `"memory"`
    /// when the in-memory fallback did.
    pub storage: String,
}
