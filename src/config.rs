use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub fact_check: FactCheckConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub journeys: Vec<JourneyConfig>,
    #[serde(default = "default_source_types")]
    pub source_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            vector: VectorConfig::default(),
            fact_check: FactCheckConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
            journeys: Vec::new(),
            source_types: default_source_types(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for content-addressed uploaded documents.
    #[serde(default = "default_object_store")]
    pub object_store: PathBuf,
    /// Root directory for per-journey version timelines.
    #[serde(default = "default_versions_dir")]
    pub versions_dir: PathBuf,
    /// Flat JSON file holding journey definitions.
    #[serde(default = "default_journeys_file")]
    pub journeys_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_store: default_object_store(),
            versions_dir: default_versions_dir(),
            journeys_file: default_journeys_file(),
        }
    }
}

fn default_object_store() -> PathBuf {
    PathBuf::from("./data/object_store")
}
fn default_versions_dir() -> PathBuf {
    PathBuf::from("./data/req_versions")
}
fn default_journeys_file() -> PathBuf {
    PathBuf::from("./data/journeys.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap carried from the end of one chunk into the next.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Evidence kept after cross-query deduplication.
    #[serde(default = "default_evidence_limit")]
    pub evidence_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            evidence_limit: default_evidence_limit(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_evidence_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    768
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat/embeddings API.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; doubled per attempt plus jitter.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "REQFORGE_API_KEY".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Remote vector backend URL. When absent the in-memory store is used.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_vector_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_vector_api_key_env(),
            timeout_secs: default_vector_timeout(),
        }
    }
}

fn default_vector_api_key_env() -> String {
    "REQFORGE_VECTOR_API_KEY".to_string()
}
fn default_vector_timeout() -> u64 {
    30
}

/// One entry of the phrase-boost table applied during fact-check reranking.
#[derive(Debug, Deserialize, Clone)]
pub struct BoostRule {
    /// Case-insensitive substring to look for in evidence text.
    pub pattern: String,
    /// Score multiplier applied when the pattern matches.
    pub multiplier: f64,
    /// Strong markers also gate the fallback-widening pass.
    #[serde(default)]
    pub strong: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FactCheckConfig {
    /// Query variants expanded from the original claim. `{claim}` and
    /// `{journey}` placeholders are substituted.
    #[serde(default = "default_expansion_templates")]
    pub expansion_templates: Vec<String>,
    /// Very specific queries issued when no strong marker appears in the
    /// top results after boosting.
    #[serde(default)]
    pub fallback_queries: Vec<String>,
    #[serde(default)]
    pub boost_rules: Vec<BoostRule>,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
}

impl Default for FactCheckConfig {
    fn default() -> Self {
        Self {
            expansion_templates: default_expansion_templates(),
            fallback_queries: Vec::new(),
            boost_rules: Vec::new(),
            synthesis_temperature: default_synthesis_temperature(),
        }
    }
}

fn default_expansion_templates() -> Vec<String> {
    vec![
        "{journey} {claim}".to_string(),
        "{journey} eligibility criteria requirements conditions".to_string(),
    ]
}
fn default_synthesis_temperature() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
    /// Lower bound on cases allocated to one page.
    #[serde(default = "default_min_cases_per_page")]
    pub min_cases_per_page: usize,
    /// Documents included in the prompt context.
    #[serde(default = "default_max_context_docs")]
    pub max_context_docs: usize,
    /// Chunks per document in the prompt context.
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
    /// Character cap per chunk in the prompt context.
    #[serde(default = "default_chunk_char_cap")]
    pub chunk_char_cap: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            context_top_k: default_context_top_k(),
            min_cases_per_page: default_min_cases_per_page(),
            max_context_docs: default_max_context_docs(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            chunk_char_cap: default_chunk_char_cap(),
        }
    }
}

fn default_context_top_k() -> usize {
    20
}
fn default_min_cases_per_page() -> usize {
    10
}
fn default_max_context_docs() -> usize {
    8
}
fn default_max_chunks_per_doc() -> usize {
    5
}
fn default_chunk_char_cap() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8741".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct JourneyConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn default_source_types() -> Vec<String> {
    [
        "fsd",
        "addendum",
        "annexure",
        "email",
        "meeting_notes",
        "change_request",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.generation.context_top_k == 0 {
        anyhow::bail!("generation.context_top_k must be >= 1");
    }
    for rule in &config.fact_check.boost_rules {
        if rule.multiplier <= 0.0 {
            anyhow::bail!(
                "fact_check.boost_rules: multiplier must be > 0 (pattern '{}')",
                rule.pattern
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults_applied() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.source_types.len(), 6);
    }

    #[test]
    fn test_default_impl_matches_parsed_defaults() {
        let f = write_config("");
        let parsed = load_config(f.path()).unwrap();
        let built = Config::default();
        assert_eq!(built.source_types, parsed.source_types);
        assert_eq!(built.vector.api_key_env, parsed.vector.api_key_env);
        assert_eq!(built.vector.timeout_secs, parsed.vector.timeout_secs);
        assert_eq!(
            built.fact_check.expansion_templates,
            parsed.fact_check.expansion_templates
        );
        assert_eq!(built.chunking.chunk_size, parsed.chunking.chunk_size);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let f = write_config("[chunking]\nchunk_size = 100\noverlap = 100\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_boost_rule_multiplier_validated() {
        let f = write_config(
            "[[fact_check.boost_rules]]\npattern = \"eligibility criteria\"\nmultiplier = 0.0\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_boost_rules_parsed() {
        let f = write_config(
            r#"
[[fact_check.boost_rules]]
pattern = "eligibility criteria"
multiplier = 2.0
strong = true

[[fact_check.boost_rules]]
pattern = "minimum age"
multiplier = 3.0
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.fact_check.boost_rules.len(), 2);
        assert!(config.fact_check.boost_rules[0].strong);
        assert!(!config.fact_check.boost_rules[1].strong);
    }
}
