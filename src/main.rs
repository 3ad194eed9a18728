//! # reqforge CLI
//!
//! The `reqforge` binary turns requirement documents into structured,
//! reviewable test cases. It provides commands for ingesting documents,
//! searching and fact-checking indexed requirements, generating paginated
//! test-case batches, inspecting version timelines, and starting the
//! JSON HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! reqforge --config ./config/reqforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reqforge ingest <file>` | Ingest a requirement document for a journey |
//! | `reqforge search "<query>"` | Semantic search within a journey |
//! | `reqforge generate` | Generate one page of test cases |
//! | `reqforge fact-check "<claim>"` | Verify a claim against the requirements |
//! | `reqforge timeline` | Show a journey's version history |
//! | `reqforge diff <from> <to>` | Diff two requirement versions |
//! | `reqforge journeys` | List journey definitions |
//! | `reqforge stats` | Vector store statistics |
//! | `reqforge clear` | Delete a journey's vectors |
//! | `reqforge serve` | Start the HTTP server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reqforge::config::{self, Config};
use reqforge::models::Steps;
use reqforge::server::{run_server, AppState};
use reqforge::storage::JourneyStore;
use reqforge::testgen::GenerationRequest;
use reqforge::versioning::VersioningStore;

/// reqforge: requirements-to-test-case generation with retrieval-augmented
/// grounding.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "reqforge",
    about = "Generate structured test cases from banking journey requirement documents",
    version,
    long_about = "reqforge ingests requirement documents (plain text, PDF, DOCX), versions \
    them per journey, indexes them for semantic retrieval, and uses an LLM to generate \
    structured test cases, fact-check claims against the requirements, and analyze how \
    requirements changed over time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reqforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a requirement document for a journey.
    ///
    /// Extracts text (plain, PDF, or DOCX), stores the original bytes,
    /// records a new version on the journey's timeline, and indexes the
    /// text for retrieval.
    Ingest {
        /// Path to the document.
        file: PathBuf,

        /// Journey the document belongs to.
        #[arg(long)]
        journey: String,

        /// Source type: fsd, addendum, annexure, email, meeting_notes,
        /// change_request (configurable).
        #[arg(long, default_value = "fsd")]
        source_type: String,

        /// Date the requirements take effect (YYYY-MM-DD).
        #[arg(long)]
        effective_date: Option<String>,
    },

    /// Search a journey's indexed requirements.
    Search {
        /// The search query string.
        query: String,

        #[arg(long)]
        journey: String,

        /// Restrict to specific source types (repeatable).
        #[arg(long = "source-type")]
        source_types: Vec<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate one page of test cases for a journey.
    Generate {
        #[arg(long)]
        journey: String,

        /// Target number of test cases across all pages.
        #[arg(long, default_value_t = 30)]
        max_cases: usize,

        /// 1-based page of requirement context to generate from.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Extra focus folded into retrieval and the prompt.
        #[arg(long)]
        context: Option<String>,

        /// Override the configured model.
        #[arg(long)]
        model: Option<String>,
    },

    /// Verify a claim against a journey's requirements.
    FactCheck {
        /// The claim to verify.
        claim: String,

        #[arg(long)]
        journey: String,
    },

    /// Show a journey's version timeline.
    Timeline {
        #[arg(long)]
        journey: String,
    },

    /// Diff two requirement versions of a journey.
    Diff {
        /// Older version id.
        from: String,
        /// Newer version id.
        to: String,

        #[arg(long)]
        journey: String,

        /// Also run an LLM analysis of the substantive changes.
        #[arg(long)]
        analyze: bool,
    },

    /// List journey definitions.
    Journeys,

    /// Show vector store statistics.
    Stats,

    /// Delete a journey's vectors from the store.
    Clear {
        #[arg(long)]
        journey: String,

        /// Restrict deletion to one version's chunks.
        #[arg(long)]
        version: Option<String>,
    },

    /// Start the JSON HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reqforge=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    // Commands that only touch local files skip provider construction.
    match &cli.command {
        Commands::Timeline { journey } => {
            return print_timeline(&cfg, journey);
        }
        Commands::Diff {
            from,
            to,
            journey,
            analyze: false,
        } => {
            let store = VersioningStore::new(&cfg.storage.versions_dir);
            let diff = store.diff(journey, from, to)?;
            println!("{}", serde_json::to_string_pretty(&diff)?);
            return Ok(());
        }
        Commands::Journeys => {
            let store = JourneyStore::new(&cfg.storage.journeys_file, &cfg.journeys);
            for journey in store.list()? {
                if journey.description.is_empty() {
                    println!("{}", journey.name);
                } else {
                    println!("{}: {}", journey.name, journey.description);
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let state = AppState::build(&cfg)?;

    match cli.command {
        Commands::Ingest {
            file,
            journey,
            source_type,
            effective_date,
        } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let outcome = state
                .requirements
                .ingest(&journey, &source_type, &bytes, &filename, effective_date)
                .await?;
            if !state.journeys.known(&journey)? {
                state.journeys.upsert(reqforge::storage::Journey {
                    name: journey.clone(),
                    description: String::new(),
                })?;
            }
            println!(
                "Ingested {} as version {} ({} chunks, {} storage)",
                filename, outcome.version, outcome.chunks_indexed, outcome.storage
            );
            if !outcome.summary.is_empty() {
                println!("Summary: {}", outcome.summary);
            }
        }
        Commands::Search {
            query,
            journey,
            source_types,
            limit,
        } => {
            let types = if source_types.is_empty() {
                None
            } else {
                Some(source_types)
            };
            let hits = state.requirements.search(&journey, &query, limit, types).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({})",
                    i + 1,
                    hit.score,
                    hit.meta_str("source_type"),
                    hit.meta_str("version")
                );
                println!("   {}", snippet(&hit.text, 200));
            }
        }
        Commands::Generate {
            journey,
            max_cases,
            page,
            context,
            model,
        } => {
            let result = state
                .generator
                .generate(&GenerationRequest {
                    journey,
                    max_cases,
                    page,
                    context,
                    model,
                    temperature: None,
                })
                .await?;
            println!(
                "Page {}/{}: {} cases ({} chunks available, model {})",
                result.page,
                result.total_pages,
                result.test_cases.len(),
                result.total_available,
                result.model_used
            );
            for case in &result.test_cases {
                println!();
                println!("[{}] {}", case.test_case_id, case.test_case_name);
                println!("  Type: {:?}  Priority: {:?}", case.test_type, case.priority);
                println!("  Preconditions: {}", case.preconditions);
                match &case.steps {
                    Steps::One(step) => println!("  Steps: {step}"),
                    Steps::Many(steps) => {
                        for (i, step) in steps.iter().enumerate() {
                            println!("  Step {}: {}", i + 1, step);
                        }
                    }
                }
                println!("  Expected: {}", case.expected_result);
            }
            if result.has_next_page {
                println!();
                println!("More context remains; rerun with --page {}", result.page + 1);
            }
        }
        Commands::FactCheck { claim, journey } => {
            let result = state.requirements.fact_check(&journey, &claim).await?;
            println!("Claim: {}", result.claim);
            println!(
                "Strength: {} (confidence {:.2}, {} sources, {} evidence items)",
                result.strength, result.confidence, result.sources, result.total_evidence
            );
            println!();
            println!("{}", result.answer);
        }
        Commands::Diff {
            from,
            to,
            journey,
            analyze: true,
        } => {
            let analysis = state.requirements.analyze_changes(&journey, &from, &to).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Stats => {
            let (stats, storage) = state.rag.stats().await?;
            println!("Storage: {storage}");
            println!("Vectors: {} ({} dims)", stats.total_count, stats.dimension);
            for (namespace, count) in &stats.namespaces {
                println!("  {namespace}: {count}");
            }
        }
        Commands::Clear { journey, version } => {
            let removed = match version {
                Some(v) => {
                    let filter = reqforge::vector::filter_eq("version", v.as_str());
                    state.rag.clear(&journey, Some(&filter)).await?
                }
                None => state.rag.clear(&journey, None).await?,
            };
            println!("Removed {removed} vectors for journey '{journey}'.");
        }
        Commands::Serve => {
            run_server(&cfg).await?;
        }
        // Handled before provider construction.
        Commands::Timeline { .. } | Commands::Journeys | Commands::Diff { .. } => unreachable!(),
    }

    Ok(())
}

fn print_timeline(cfg: &Config, journey: &str) -> Result<()> {
    let store = VersioningStore::new(&cfg.storage.versions_dir);
    let versions = store.timeline(journey)?;
    if versions.is_empty() {
        println!("No versions recorded for journey '{journey}'.");
        return Ok(());
    }
    for version in versions {
        println!("{}  ({})", version.version, version.created_at);
        if !version.summary.is_empty() {
            println!("  {}", version.summary);
        }
        if let Some(date) = &version.effective_date {
            println!("  effective: {date}");
        }
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
