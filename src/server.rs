//! JSON HTTP API over the requirements and generation services.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/requirements/ingest` | Ingest one requirement document |
//! | `POST` | `/requirements/search` | Journey-scoped semantic search |
//! | `POST` | `/requirements/fact-check` | Verify a claim against requirements |
//! | `GET`  | `/requirements/{journey}/timeline` | Version history |
//! | `POST` | `/requirements/diff` | Diff two versions, optional LLM analysis |
//! | `POST` | `/tests/generate` | Generate one page of test cases |
//! | `GET`  | `/journeys` | List journey definitions |
//! | `GET`  | `/vectors/stats` | Vector store statistics |
//! | `POST` | `/vectors/clear` | Delete a journey's vectors |
//! | `POST` | `/tasks/generate-batch` | Submit batch generation |
//! | `GET`  | `/tasks` | List background tasks |
//! | `GET`  | `/tasks/{id}` | Poll one task |
//! | `POST` | `/tasks/{id}/cancel` | Request cancellation |
//! | `POST` | `/tasks/cleanup` | Drop finished tasks |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "journey must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `provider_unavailable`
//! (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::ReqforgeError;
use crate::llm::{HttpLlmProvider, LlmProvider};
use crate::rag::RagService;
use crate::requirements::RequirementsManager;
use crate::storage::{Journey, JourneyStore};
use crate::tasks::TaskRegistry;
use crate::testgen::{GenerationRequest, TestGenerator};
use crate::vector::{filter_eq, RemoteVectorStore, VectorStore};

/// Shared application state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub requirements: Arc<RequirementsManager>,
    pub generator: Arc<TestGenerator>,
    pub rag: Arc<RagService>,
    pub journeys: Arc<JourneyStore>,
    pub tasks: TaskRegistry,
}

impl AppState {
    /// Wire the full service graph from configuration. The LLM provider
    /// and, when configured, the remote vector store are constructed
    /// here; credential problems surface now, not per request.
    pub fn build(config: &Config) -> Result<Self, ReqforgeError> {
        let llm: Arc<dyn LlmProvider> = Arc::new(HttpLlmProvider::new(&config.llm)?);
        Self::with_provider(config, llm)
    }

    pub fn with_provider(
        config: &Config,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self, ReqforgeError> {
        let remote: Option<Arc<dyn VectorStore>> = match &config.vector.base_url {
            Some(_) => Some(Arc::new(RemoteVectorStore::new(
                &config.vector,
                config.embedding.dims,
            )?)),
            None => None,
        };
        let rag = Arc::new(RagService::new(config, llm.clone(), remote));
        Ok(Self {
            requirements: Arc::new(RequirementsManager::new(config, llm.clone(), rag.clone())),
            generator: Arc::new(TestGenerator::new(config, llm, rag.clone())),
            rag,
            journeys: Arc::new(JourneyStore::new(
                &config.storage.journeys_file,
                &config.journeys,
            )),
            tasks: TaskRegistry::new(4),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::build(config)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("reqforge server listening on http://{bind_addr}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/requirements/ingest", post(handle_ingest))
        .route("/requirements/search", post(handle_search))
        .route("/requirements/fact-check", post(handle_fact_check))
        .route("/requirements/{journey}/timeline", get(handle_timeline))
        .route("/requirements/diff", post(handle_diff))
        .route("/tests/generate", post(handle_generate))
        .route("/journeys", get(handle_journeys))
        .route("/vectors/stats", get(handle_vector_stats))
        .route("/vectors/clear", post(handle_vector_clear))
        .route("/tasks/generate-batch", post(handle_generate_batch))
        .route("/tasks", get(handle_list_tasks))
        .route("/tasks/{id}", get(handle_task_status))
        .route("/tasks/{id}/cancel", post(handle_task_cancel))
        .route("/tasks/cleanup", post(handle_task_cleanup))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<ReqforgeError> for AppError {
    fn from(err: ReqforgeError) -> Self {
        match err {
            ReqforgeError::UserInput(message) => bad_request(message),
            ReqforgeError::TransientProvider { message, .. } => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "provider_unavailable".to_string(),
                message,
            },
            ReqforgeError::FatalConfig(message) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message,
            },
            ReqforgeError::Other(e) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Requirements ============

#[derive(Deserialize)]
struct IngestRequest {
    journey: String,
    source_type: String,
    /// Document text. Binary formats go through the CLI, which extracts
    /// before upload.
    content: String,
    #[serde(default = "default_filename")]
    filename: String,
    #[serde(default)]
    effective_date: Option<String>,
}

fn default_filename() -> String {
    "document.txt".to_string()
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state
        .requirements
        .ingest(
            &req.journey,
            &req.source_type,
            req.content.as_bytes(),
            &req.filename,
            req.effective_date,
        )
        .await?;
    // First document for a journey also registers it.
    if !state.journeys.known(&req.journey)? {
        state.journeys.upsert(Journey {
            name: req.journey.clone(),
            description: String::new(),
        })?;
    }
    Ok(Json(serde_json::to_value(outcome).map_err(anyhow::Error::from)?))
}

#[derive(Deserialize)]
struct SearchRequest {
    journey: String,
    query: String,
    #[serde(default = "default_search_top_k")]
    top_k: usize,
    #[serde(default)]
    source_types: Option<Vec<String>>,
}

fn default_search_top_k() -> usize {
    10
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hits = state
        .requirements
        .search(&req.journey, &req.query, req.top_k, req.source_types)
        .await?;
    Ok(Json(json!({ "results": hits })))
}

#[derive(Deserialize)]
struct FactCheckRequest {
    journey: String,
    claim: String,
}

async fn handle_fact_check(
    State(state): State<AppState>,
    Json(req): Json<FactCheckRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state.requirements.fact_check(&req.journey, &req.claim).await?;
    Ok(Json(serde_json::to_value(result).map_err(anyhow::Error::from)?))
}

async fn handle_timeline(
    State(state): State<AppState>,
    Path(journey): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let versions = state.requirements.timeline(&journey)?;
    Ok(Json(json!({ "journey": journey, "versions": versions })))
}

#[derive(Deserialize)]
struct DiffRequest {
    journey: String,
    from: String,
    to: String,
    #[serde(default)]
    analyze: bool,
}

async fn handle_diff(
    State(state): State<AppState>,
    Json(req): Json<DiffRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let value = if req.analyze {
        let analysis = state
            .requirements
            .analyze_changes(&req.journey, &req.from, &req.to)
            .await?;
        serde_json::to_value(analysis).map_err(anyhow::Error::from)?
    } else {
        let diff = state.requirements.diff(&req.journey, &req.from, &req.to)?;
        serde_json::to_value(diff).map_err(anyhow::Error::from)?
    };
    Ok(Json(value))
}

// ============ Generation ============

#[derive(Deserialize)]
struct GenerateRequest {
    journey: String,
    #[serde(default = "default_max_cases")]
    max_cases: usize,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

fn default_max_cases() -> usize {
    30
}
fn default_page() -> usize {
    1
}

impl GenerateRequest {
    fn into_generation(self) -> GenerationRequest {
        GenerationRequest {
            journey: self.journey,
            max_cases: self.max_cases,
            page: self.page,
            context: self.context,
            model: self.model,
            temperature: self.temperature,
        }
    }
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state.generator.generate(&req.into_generation()).await?;
    Ok(Json(serde_json::to_value(result).map_err(anyhow::Error::from)?))
}

// ============ Journeys and vectors ============

async fn handle_journeys(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let journeys = state.journeys.list()?;
    Ok(Json(json!({ "journeys": journeys })))
}

async fn handle_vector_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (stats, storage) = state.rag.stats().await?;
    Ok(Json(json!({
        "storage": storage,
        "total_count": stats.total_count,
        "dimension": stats.dimension,
        "namespaces": stats.namespaces,
    })))
}

#[derive(Deserialize)]
struct ClearRequest {
    journey: String,
    /// Restrict deletion to one version's chunks.
    #[serde(default)]
    version: Option<String>,
}

async fn handle_vector_clear(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.journey.trim().is_empty() {
        return Err(bad_request("journey must not be empty"));
    }
    let removed = match &req.version {
        Some(version) => {
            let filter = filter_eq("version", version.as_str());
            state.rag.clear(&req.journey, Some(&filter)).await?
        }
        None => state.rag.clear(&req.journey, None).await?,
    };
    Ok(Json(json!({ "journey": req.journey, "removed": removed })))
}

// ============ Background tasks ============

#[derive(Deserialize)]
struct BatchGenerateRequest {
    journey: String,
    #[serde(default = "default_max_cases")]
    max_cases: usize,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn handle_generate_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchGenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.journey.trim().is_empty() {
        return Err(bad_request("journey must not be empty"));
    }
    let id = state.tasks.submit_batch_generation(
        state.generator.clone(),
        GenerationRequest {
            journey: req.journey,
            max_cases: req.max_cases,
            page: 1,
            context: req.context,
            model: req.model,
            temperature: None,
        },
    );
    Ok(Json(json!({ "task_id": id, "status": "submitted" })))
}

async fn handle_list_tasks(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "tasks": state.tasks.list() }))
}

async fn handle_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state
        .tasks
        .status(&id)
        .ok_or_else(|| not_found(format!("no task with id: {id}")))?;
    Ok(Json(serde_json::to_value(status).map_err(anyhow::Error::from)?))
}

async fn handle_task_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.tasks.cancel(&id) {
        Ok(Json(json!({ "task_id": id, "status": "cancel_requested" })))
    } else {
        Err(not_found(format!("no cancellable task with id: {id}")))
    }
}

async fn handle_task_cleanup(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.tasks.cleanup();
    Json(json!({ "removed": removed }))
}

// ============ Health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
