//! Requirement document lifecycle and claim fact-checking.
//!
//! [`RequirementsManager`] owns ingestion (extract, persist, version,
//! summarize, index), journey-scoped search, timeline queries, and the
//! fact-check pipeline: expand the claim into query variants, gather
//! evidence concurrently, deduplicate, apply the configured phrase
//! boosts, widen with fallback queries when nothing strong surfaced,
//! then synthesize a grounded answer and a strength/confidence analysis.
//!
//! LLM failures inside the pipeline degrade (empty summary, default
//! analysis), and a journey with no evidence at all produces a
//! deterministic not-found answer; only missing input is an error.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{BoostRule, Config};
use crate::error::ReqforgeError;
use crate::extract::extract_text;
use crate::llm::{LlmProvider, Message};
use crate::models::{Evidence, Metadata, Version};
use crate::rag::RagService;
use crate::storage::{ObjectStore, StoredObject};
use crate::vector::{Filter, FilterCond};
use crate::versioning::{VersionDiff, VersioningStore};

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub journey: String,
    pub version: String,
    pub chunks_indexed: usize,
    pub storage: String,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct FactCheckResult {
    pub journey: String,
    pub claim: String,
    pub answer: String,
    pub strength: String,
    pub confidence: f64,
    pub sources: usize,
    pub total_evidence: usize,
    pub evidence: Vec<EvidenceCitation>,
}

#[derive(Debug, Serialize)]
pub struct EvidenceCitation {
    pub text: String,
    pub source_type: String,
    pub version: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct ChangeAnalysis {
    #[serde(flatten)]
    pub diff: VersionDiff,
    pub analysis: String,
}

const NO_EVIDENCE_ANSWER: &str = "No relevant information found in the uploaded documents \
     for this journey. Please ensure you have uploaded the appropriate requirement documents.";

pub struct RequirementsManager {
    llm: Arc<dyn LlmProvider>,
    rag: Arc<RagService>,
    objects: ObjectStore,
    versions: VersioningStore,
    source_types: Vec<String>,
    top_k: usize,
    evidence_limit: usize,
    expansion_templates: Vec<String>,
    fallback_queries: Vec<String>,
    boost_rules: Vec<BoostRule>,
    synthesis_temperature: f32,
    model: String,
}

impl RequirementsManager {
    pub fn new(config: &Config, llm: Arc<dyn LlmProvider>, rag: Arc<RagService>) -> Self {
        Self {
            llm,
            rag,
            objects: ObjectStore::new(&config.storage.object_store),
            versions: VersioningStore::new(&config.storage.versions_dir),
            source_types: config.source_types.clone(),
            top_k: config.retrieval.top_k,
            evidence_limit: config.retrieval.evidence_limit,
            expansion_templates: config.fact_check.expansion_templates.clone(),
            fallback_queries: config.fact_check.fallback_queries.clone(),
            boost_rules: config.fact_check.boost_rules.clone(),
            synthesis_temperature: config.fact_check.synthesis_temperature,
            model: config.llm.default_model.clone(),
        }
    }

    /// Ingest one requirement document: extract text, persist the raw
    /// bytes, record a version, summarize, and index for retrieval.
    pub async fn ingest(
        &self,
        journey: &str,
        source_type: &str,
        bytes: &[u8],
        filename: &str,
        effective_date: Option<String>,
    ) -> Result<IngestOutcome, ReqforgeError> {
        if journey.trim().is_empty() {
            return Err(ReqforgeError::UserInput("journey must not be empty".into()));
        }
        if !self.source_types.iter().any(|t| t == source_type) {
            return Err(ReqforgeError::UserInput(format!(
                "unknown source type '{source_type}' (expected one of: {})",
                self.source_types.join(", ")
            )));
        }

        let text = extract_text(bytes, filename)
            .map_err(|e| ReqforgeError::UserInput(format!("could not read '{filename}': {e}")))?;
        if text.trim().is_empty() {
            return Err(ReqforgeError::UserInput(format!(
                "'{filename}' contains no extractable text"
            )));
        }

        let stored: StoredObject = self.objects.store(bytes, filename)?;
        let summary = self.summarize(journey, &text).await;
        let version: Version = self.versions.record(
            journey,
            source_type,
            &text,
            &summary,
            &stored.path.to_string_lossy(),
            effective_date.clone(),
        )?;

        let mut metadata = Metadata::new();
        metadata.insert("journey".into(), json!(journey));
        metadata.insert("source_type".into(), json!(source_type));
        metadata.insert("version".into(), json!(version.version));
        metadata.insert("document_id".into(), json!(stored.digest));
        metadata.insert("summary".into(), json!(summary));
        if let Some(date) = effective_date {
            metadata.insert("effective_date".into(), json!(date));
        }

        let outcome = self.rag.index_text(&text, &metadata).await?;
        info!(
            journey,
            version = %version.version,
            chunks = outcome.chunks_indexed,
            storage = %outcome.storage,
            "ingested requirement document"
        );
        Ok(IngestOutcome {
            journey: journey.to_string(),
            version: version.version,
            chunks_indexed: outcome.chunks_indexed,
            storage: outcome.storage,
            summary,
        })
    }

    /// Journey-scoped semantic search with optional source-type narrowing.
    pub async fn search(
        &self,
        journey: &str,
        query: &str,
        top_k: usize,
        source_types: Option<Vec<String>>,
    ) -> Result<Vec<Evidence>, ReqforgeError> {
        if query.trim().is_empty() {
            return Err(ReqforgeError::UserInput("query must not be empty".into()));
        }
        let mut filter = Filter::new();
        filter.insert("journey".into(), FilterCond::Eq(json!(journey)));
        if let Some(types) = source_types {
            filter.insert(
                "source_type".into(),
                FilterCond::In {
                    values: types.into_iter().map(|t| json!(t)).collect(),
                },
            );
        }
        Ok(self.rag.search(query, top_k, Some(&filter)).await?)
    }

    pub fn timeline(&self, journey: &str) -> Result<Vec<Version>> {
        self.versions.timeline(journey)
    }

    pub fn diff(&self, journey: &str, from: &str, to: &str) -> Result<VersionDiff> {
        self.versions.diff(journey, from, to)
    }

    /// Diff two versions and ask the model what changed in substance.
    /// The diff always succeeds independently of the analysis.
    pub async fn analyze_changes(
        &self,
        journey: &str,
        from: &str,
        to: &str,
    ) -> Result<ChangeAnalysis> {
        let diff = self.versions.diff(journey, from, to)?;
        let prompt = format!(
            "Requirements for the '{journey}' journey changed between versions \
             {from} and {to}.\n\nAdded lines:\n{}\n\nRemoved lines:\n{}\n\n\
             Summarize the substantive changes in 2-4 sentences, focusing on \
             altered behavior, new conditions, and removed obligations.",
            diff.added_lines.join("\n"),
            diff.removed_lines.join("\n"),
        );
        let analysis = match self
            .llm
            .complete(&[Message::user(prompt)], &self.model, 0.2)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "change analysis unavailable");
                String::new()
            }
        };
        Ok(ChangeAnalysis { diff, analysis })
    }

    /// Fact-check a claim against a journey's indexed requirements.
    pub async fn fact_check(
        &self,
        journey: &str,
        claim: &str,
    ) -> Result<FactCheckResult, ReqforgeError> {
        if claim.trim().is_empty() {
            return Err(ReqforgeError::UserInput("claim must not be empty".into()));
        }

        let queries = self.expand_queries(journey, claim);
        let mut evidence = self.gather(journey, &queries).await;

        apply_boosts(&mut evidence, &self.boost_rules);
        rank_and_cap(&mut evidence, self.evidence_limit);

        // Nothing strong in the top results: widen with the very specific
        // fallback queries. The widened items are boosted once and
        // prepended; already-boosted evidence keeps its scores.
        if (evidence.is_empty() || !self.has_strong_marker(&evidence))
            && !self.fallback_queries.is_empty()
        {
            let mut widened = self.gather(journey, &self.fallback_queries).await;
            apply_boosts(&mut widened, &self.boost_rules);
            evidence = merge_dedup(widened, evidence);
            rank_and_cap(&mut evidence, self.evidence_limit);
        }

        // Zero evidence after every expansion round is an answer, not an
        // error: the claim simply cannot be checked yet.
        if evidence.is_empty() {
            return Ok(FactCheckResult {
                journey: journey.to_string(),
                claim: claim.to_string(),
                answer: NO_EVIDENCE_ANSWER.to_string(),
                strength: "very_weak".to_string(),
                confidence: 0.0,
                sources: 0,
                total_evidence: 0,
                evidence: Vec::new(),
            });
        }

        let sources = count_sources(&evidence);
        let total_evidence = evidence.len();
        let answer = self.synthesize(journey, claim, &evidence).await;
        let (strength, confidence) = self.analyze(claim, &answer, &evidence).await;

        Ok(FactCheckResult {
            journey: journey.to_string(),
            claim: claim.to_string(),
            answer,
            strength,
            confidence,
            sources,
            total_evidence,
            evidence: evidence
                .into_iter()
                .map(|e| EvidenceCitation {
                    source_type: e.meta_str("source_type").to_string(),
                    version: e.meta_str("version").to_string(),
                    score: e.score,
                    text: e.text,
                })
                .collect(),
        })
    }

    fn expand_queries(&self, journey: &str, claim: &str) -> Vec<String> {
        let mut queries = vec![claim.to_string()];
        for template in &self.expansion_templates {
            let q = template
                .replace("{claim}", claim)
                .replace("{journey}", journey);
            if !queries.contains(&q) {
                queries.push(q);
            }
        }
        queries
    }

    /// Run all queries concurrently; failed queries contribute nothing.
    /// Results merge in query order so the output is deterministic, then
    /// deduplicate on the leading 200 characters of each hit.
    async fn gather(&self, journey: &str, queries: &[String]) -> Vec<Evidence> {
        let mut set = JoinSet::new();
        for (i, query) in queries.iter().enumerate() {
            let rag = self.rag.clone();
            let query = query.clone();
            let mut filter = Filter::new();
            filter.insert("journey".into(), FilterCond::Eq(json!(journey)));
            let top_k = self.top_k;
            set.spawn(async move {
                let hits = match rag.search(&query, top_k, Some(&filter)).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!(error = %e, query = %query, "evidence query failed");
                        Vec::new()
                    }
                };
                (i, hits)
            });
        }

        let mut per_query: Vec<(usize, Vec<Evidence>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(result) = joined {
                per_query.push(result);
            }
        }
        per_query.sort_by_key(|(i, _)| *i);

        let mut seen = BTreeSet::new();
        let mut merged = Vec::new();
        for (_, hits) in per_query {
            for hit in hits {
                if seen.insert(dedup_key(&hit.text)) {
                    merged.push(hit);
                }
            }
        }
        merged
    }

    fn has_strong_marker(&self, evidence: &[Evidence]) -> bool {
        let strong: Vec<&str> = self
            .boost_rules
            .iter()
            .filter(|r| r.strong)
            .map(|r| r.pattern.as_str())
            .collect();
        if strong.is_empty() {
            return true;
        }
        evidence.iter().take(5).any(|e| {
            let lower = e.text.to_lowercase();
            strong.iter().any(|p| lower.contains(&p.to_lowercase()))
        })
    }

    async fn summarize(&self, journey: &str, text: &str) -> String {
        let excerpt: String = text.chars().take(4000).collect();
        let prompt = format!(
            "Summarize this requirement document for the '{journey}' journey \
             in 2-3 sentences. Focus on what the system must do.\n\n{excerpt}"
        );
        match self
            .llm
            .complete(&[Message::user(prompt)], &self.model, 0.2)
            .await
        {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "summary generation unavailable");
                String::new()
            }
        }
    }

    async fn synthesize(&self, journey: &str, claim: &str, evidence: &[Evidence]) -> String {
        let context = build_synthesis_context(evidence, 5, 1200);
        let prompt = format!(
            "You are verifying a claim about the '{journey}' banking journey \
             against its requirement documents.\n\nClaim: {claim}\n\n\
             Requirement excerpts:\n{context}\n\n\
             State whether the requirements support, contradict, or do not \
             address the claim, citing the excerpts. Be precise about \
             conditions and amounts."
        );
        match self
            .llm
            .complete(&[Message::user(prompt)], &self.model, self.synthesis_temperature)
            .await
        {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "fact-check synthesis unavailable");
                "Unable to synthesize an answer; see the cited evidence.".to_string()
            }
        }
    }

    /// Ask for a strength/confidence judgement as JSON; any parse or
    /// provider failure yields the moderate/0.5 default.
    async fn analyze(&self, claim: &str, answer: &str, evidence: &[Evidence]) -> (String, f64) {
        let prompt = format!(
            "Claim: {claim}\nVerdict: {answer}\nEvidence items: {}\n\n\
             Respond with only a JSON object: {{\"strength\": \
             \"very_weak\"|\"weak\"|\"moderate\"|\"strong\", \"confidence\": 0.0-1.0}}",
            evidence.len()
        );
        let response = match self
            .llm
            .complete(&[Message::user(prompt)], &self.model, 0.1)
            .await
        {
            Ok(r) => r,
            Err(_) => return ("moderate".to_string(), 0.5),
        };
        parse_analysis(&response).unwrap_or(("moderate".to_string(), 0.5))
    }
}

fn parse_analysis(response: &str) -> Option<(String, f64)> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&response[start..=end]).ok()?;
    let strength = value.get("strength")?.as_str()?.to_string();
    let confidence = value.get("confidence")?.as_f64()?;
    Some((strength, confidence.clamp(0.0, 1.0)))
}

/// Dedup on the leading 200 characters: near-identical chunks surfaced by
/// different queries count once.
fn dedup_key(text: &str) -> String {
    let prefix: String = text.chars().take(200).collect();
    let digest = Sha256::digest(prefix.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn apply_boosts(evidence: &mut [Evidence], rules: &[BoostRule]) {
    for item in evidence.iter_mut() {
        let lower = item.text.to_lowercase();
        for rule in rules {
            if lower.contains(&rule.pattern.to_lowercase()) {
                item.score *= rule.multiplier;
            }
        }
    }
}

fn rank_and_cap(evidence: &mut Vec<Evidence>, limit: usize) {
    evidence.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    evidence.truncate(limit);
}

fn merge_dedup(base: Vec<Evidence>, extra: Vec<Evidence>) -> Vec<Evidence> {
    let mut seen: BTreeSet<String> = base.iter().map(|e| dedup_key(&e.text)).collect();
    let mut merged = base;
    for item in extra {
        if seen.insert(dedup_key(&item.text)) {
            merged.push(item);
        }
    }
    merged
}

fn count_sources(evidence: &[Evidence]) -> usize {
    evidence
        .iter()
        .map(|e| e.meta_str("document_id"))
        .filter(|d| !d.is_empty())
        .collect::<BTreeSet<_>>()
        .len()
        .max(1)
}

/// Group evidence by source document, keep the best chunks of each, and
/// truncate so one verbose document cannot crowd out the rest.
fn build_synthesis_context(
    evidence: &[Evidence],
    max_chunks_per_doc: usize,
    char_cap: usize,
) -> String {
    let mut order: Vec<&str> = Vec::new();
    for item in evidence {
        let doc = item.meta_str("document_id");
        if !order.contains(&doc) {
            order.push(doc);
        }
    }

    let mut sections = Vec::new();
    for doc in order {
        let chunks: Vec<String> = evidence
            .iter()
            .filter(|e| e.meta_str("document_id") == doc)
            .take(max_chunks_per_doc)
            .map(|e| {
                let truncated: String = e.text.chars().take(char_cap).collect();
                format!("[{} {}] {}", e.meta_str("source_type"), e.meta_str("version"), truncated)
            })
            .collect();
        sections.push(chunks.join("\n"));
    }
    sections.join("\n---\n")
}
