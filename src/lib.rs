//! # reqforge
//!
//! Requirements-to-test-case generation for banking and enterprise
//! "journeys": ingest requirement documents, index them for semantic
//! retrieval, and use an LLM to synthesize structured test cases,
//! fact-check claims, and analyze requirement changes over time.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ Documents │──▶│ Extract +    │──▶│ VectorStore     │
//! │ txt/pdf/  │   │ Chunk+Embed  │   │ remote/memory   │
//! │ docx      │   └──────────────┘   └───────┬─────────┘
//! └───────────┘                              │
//!        │                ┌──────────────────┤
//!        ▼                ▼                  ▼
//!  ┌────────────┐   ┌───────────┐     ┌────────────┐
//!  │ Versioning │   │ FactCheck │     │ TestGen    │
//!  │ timeline   │   │ evidence  │     │ paginated  │
//!  └────────────┘   └───────────┘     └────────────┘
//!                         │                  │
//!                    ┌────┴──────────────────┴───┐
//!                    │   CLI (reqforge) / HTTP   │
//!                    └───────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Service-boundary error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Sentence-boundary overlapping chunker |
//! | [`embedding`] | Embeddings with a deterministic offline fallback |
//! | [`llm`] | LLM provider contract and retry policy |
//! | [`vector`] | Vector store trait, remote and in-memory stores |
//! | [`rag`] | Index/search composition and degraded-mode switch |
//! | [`extract`] | Plain/PDF/DOCX text extraction |
//! | [`storage`] | Content-addressed object store, journey definitions |
//! | [`versioning`] | Append-only per-journey version timelines |
//! | [`requirements`] | Ingestion and claim fact-checking |
//! | [`testgen`] | Paginated generation with defensive parsing |
//! | [`tasks`] | Background task registry |
//! | [`server`] | JSON HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod rag;
pub mod requirements;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod testgen;
pub mod vector;
pub mod versioning;
