//! End-to-end pipeline tests: ingest, search, fact-check, generate, and
//! background batch generation against a canned LLM provider and the
//! in-memory vector store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use reqforge::config::{Config, EmbeddingConfig, StorageConfig};
use reqforge::llm::{LlmProvider, Message};
use reqforge::server::AppState;
use reqforge::tasks::TaskState;
use reqforge::testgen::GenerationRequest;
use tempfile::TempDir;

/// Keyword-routed provider: picks a canned answer from the prompt shape,
/// so response order does not matter. Embedding always fails, which
/// drives the deterministic hash fallback and gives real cosine ranking.
struct ScriptedProvider;

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, messages: &[Message], _model: &str, _temp: f32) -> Result<String> {
        let prompt = &messages.last().expect("prompt").content;
        if prompt.contains("Summarize this requirement document") {
            Ok("Defines deposit limits and verification rules.".to_string())
        } else if prompt.contains("JSON array") {
            Ok(serde_json::to_string(&json!([
                {
                    "test_case_name": "Verify deposit within limit",
                    "preconditions": "Verified account exists",
                    "steps": ["Deposit 400", "Check balance"],
                    "expected_result": "Deposit accepted",
                    "test_type": "positive",
                    "priority": "High",
                    "requirement_reference": "REQ-001"
                },
                {
                    "test_case_name": "Reject deposit above limit",
                    "preconditions": "Verified account exists",
                    "steps": ["Deposit 5001"],
                    "expected_result": "Deposit rejected",
                    "test_type": "negative",
                    "priority": "Medium",
                    "requirement_reference": "REQ-002"
                }
            ]))
            .unwrap())
        } else if prompt.contains("JSON object") {
            Ok(r#"{"strength": "strong", "confidence": 0.9}"#.to_string())
        } else {
            Ok("The requirements support the claim about the deposit limit.".to_string())
        }
    }

    async fn embed(&self, _texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("embedding endpoint offline"))
    }

    async fn rerank(&self, _query: &str, candidates: &[String], _model: &str) -> Result<Vec<usize>> {
        Ok((0..candidates.len()).collect())
    }
}

fn test_state(dir: &TempDir) -> AppState {
    let config = Config {
        storage: StorageConfig {
            object_store: dir.path().join("objects"),
            versions_dir: dir.path().join("versions"),
            journeys_file: dir.path().join("journeys.json"),
        },
        embedding: EmbeddingConfig {
            model: "stub".to_string(),
            dims: 128,
        },
        ..Default::default()
    };
    AppState::with_provider(&config, Arc::new(ScriptedProvider)).unwrap()
}

#[tokio::test]
async fn ingest_search_generate_round_trip() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let outcome = state
        .requirements
        .ingest(
            "deposits",
            "fsd",
            b"The daily deposit limit is 5000. Deposits above the limit are rejected. \
              Accounts must pass identity verification before the first deposit.",
            "deposits_fsd.txt",
            None,
        )
        .await
        .unwrap();
    assert!(outcome.version.ends_with("-fsd"));
    assert_eq!(outcome.storage, "memory");
    assert!(outcome.chunks_indexed >= 1);
    assert!(outcome.summary.contains("deposit"));

    let hits = state
        .requirements
        .search("deposits", "daily deposit limit", 5, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].meta_str("journey"), "deposits");

    let result = state
        .generator
        .generate(&GenerationRequest {
            journey: "deposits".to_string(),
            max_cases: 2,
            page: 1,
            context: None,
            model: None,
            temperature: None,
        })
        .await
        .unwrap();
    assert_eq!(result.status, "success");
    assert_eq!(result.test_cases.len(), 2);
    assert_eq!(result.test_cases[0].journey, "deposits");
    assert!(!result.has_next_page);
}

#[tokio::test]
async fn journeys_are_isolated_from_each_other() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .requirements
        .ingest("loans", "fsd", b"Loan approvals need two signatures.", "loans.txt", None)
        .await
        .unwrap();
    state
        .requirements
        .ingest("cards", "fsd", b"Card issuance needs an address check.", "cards.txt", None)
        .await
        .unwrap();

    let hits = state
        .requirements
        .search("loans", "signatures", 10, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.meta_str("journey"), "loans");
    }
}

#[tokio::test]
async fn fact_check_uses_indexed_evidence() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .requirements
        .ingest(
            "deposits",
            "fsd",
            b"The daily deposit limit is 5000 for verified accounts.",
            "fsd.txt",
            None,
        )
        .await
        .unwrap();

    let result = state
        .requirements
        .fact_check("deposits", "the deposit limit is 5000")
        .await
        .unwrap();
    assert_eq!(result.strength, "strong");
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert!(!result.evidence.is_empty());
    assert!(result.answer.contains("support"));
}

#[tokio::test]
async fn timeline_and_diff_track_versions() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .requirements
        .ingest("deposits", "fsd", b"limit is 5000\nverification required\n", "v1.txt", None)
        .await
        .unwrap();
    state
        .requirements
        .ingest("deposits", "addendum", b"limit is 7500\nverification required\n", "v2.txt", None)
        .await
        .unwrap();

    let timeline = state.requirements.timeline("deposits").unwrap();
    assert_eq!(timeline.len(), 2);

    let diff = state
        .requirements
        .diff("deposits", &timeline[0].version, &timeline[1].version)
        .unwrap();
    assert_eq!(diff.added_lines, vec!["limit is 7500"]);
    assert_eq!(diff.removed_lines, vec!["limit is 5000"]);
    assert_eq!(diff.unchanged_count, 1);
}

#[tokio::test]
async fn generation_for_unknown_journey_is_user_error() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let err = state
        .generator
        .generate(&GenerationRequest {
            journey: "nonexistent".to_string(),
            max_cases: 10,
            page: 1,
            context: None,
            model: None,
            temperature: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No requirement documents"));
}

#[tokio::test]
async fn batch_generation_task_collects_all_pages() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .requirements
        .ingest("deposits", "fsd", b"The deposit limit is 5000.", "fsd.txt", None)
        .await
        .unwrap();

    let id = state.tasks.submit_batch_generation(
        state.generator.clone(),
        GenerationRequest {
            journey: "deposits".to_string(),
            max_cases: 2,
            page: 1,
            context: None,
            model: None,
            temperature: None,
        },
    );

    let mut status = state.tasks.status(&id).unwrap();
    for _ in 0..200 {
        if status.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = state.tasks.status(&id).unwrap();
    }
    assert_eq!(status.state, TaskState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["journey"], json!("deposits"));
    assert_eq!(result["test_cases"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn clearing_a_journey_empties_its_search_results() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .requirements
        .ingest("deposits", "fsd", b"The deposit limit is 5000.", "fsd.txt", None)
        .await
        .unwrap();

    let removed = state.rag.clear("deposits", None).await.unwrap();
    assert!(removed >= 1);

    let hits = state
        .requirements
        .search("deposits", "limit", 10, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}
