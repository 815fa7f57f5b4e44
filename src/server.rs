//! HTTP API.
//!
//! A thin JSON surface over the orchestrator, the retrieval engine and
//! answer synthesis. Handlers validate input and map typed errors to status
//! codes; all real work happens in the library modules.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Ingest one video (runs to completion or cancellation) |
//! | `POST` | `/ingest/cancel` | Request cancellation of one or all running ingests |
//! | `POST` | `/search` | Adaptive similarity search within one video |
//! | `POST` | `/rag/search` | Answer a question about one video |
//! | `GET`  | `/videos/{id}/meta` | Stored metadata record |
//! | `GET`  | `/health/vectorstore` | Active backend and reachability |
//! | `GET`  | `/health` | Liveness (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `store_unavailable` (503),
//! `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cancel::IngestHandle;
use crate::config::Config;
use crate::error::{IngestError, StoreError};
use crate::get::{get_video_meta, VideoMetaResponse};
use crate::ingest::Orchestrator;
use crate::models::{IngestOutcome, IngestRequest, SearchHit, SourceKind};
use crate::rag::{answer_question, OllamaAnswerModel, RagAnswer};
use crate::search::RetrievalEngine;
use crate::sources::{vector_store_health, VectorStoreHealth};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    engine: RetrievalEngine,
    answer_model: Arc<OllamaAnswerModel>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        orchestrator: Arc<Orchestrator>,
        engine: RetrievalEngine,
        answer_model: Arc<OllamaAnswerModel>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            engine,
            answer_model,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ingest/cancel", post(handle_cancel))
        .route("/search", post(handle_search))
        .route("/rag/search", post(handle_rag_search))
        .route("/videos/{id}/meta", get(handle_meta))
        .route("/health/vectorstore", get(handle_store_health))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process exits.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("vh server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::InvalidSource(_) => bad_request(err.to_string()),
            IngestError::NotFound(_) => not_found(err.to_string()),
            _ => internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(_) => not_found(err.to_string()),
            StoreError::FilterRequired | StoreError::InvalidVideoId(_) => bad_request(err.to_string()),
            StoreError::Unreachable { .. } => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "store_unavailable",
                message: err.to_string(),
            },
            _ => internal(err.to_string()),
        }
    }
}

/// Map an `anyhow` chain by the typed error inside it, if any.
fn classify(err: anyhow::Error) -> AppError {
    let err = match err.downcast::<StoreError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    match err.downcast::<IngestError>() {
        Ok(e) => e.into(),
        Err(err) => internal(format!("{:#}", err)),
    }
}

// ============ POST /ingest ============

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub source_kind: String,
    pub source: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default = "default_true")]
    pub enable_captions: bool,
    /// Caller-chosen handle for `/ingest/cancel`. Generated when absent.
    #[serde(default)]
    pub ingest_id: Option<String>,
}

fn default_fps() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ingest_id: IngestHandle,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, AppError> {
    let source_kind: SourceKind = body.source_kind.parse()?;
    let req = IngestRequest {
        source_kind,
        source: body.source,
        fps: body.fps,
        max_frames: body.max_frames,
        enable_captions: body.enable_captions,
    };
    let handle = body
        .ingest_id
        .as_deref()
        .map(IngestHandle::from)
        .unwrap_or_default();

    let outcome = state.orchestrator.ingest_as(handle.clone(), &req).await?;
    Ok(Json(IngestResponse {
        ingest_id: handle,
        outcome,
    }))
}

// ============ POST /ingest/cancel ============

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub ingest_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Cancellation was requested; it takes effect at the next stage boundary.
    pub status: &'static str,
    /// Running ingests that were signalled.
    pub signalled: usize,
}

async fn handle_cancel(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Json<CancelResponse>, AppError> {
    // An empty body cancels every running ingest.
    let body: CancelBody = if body.iter().all(u8::is_ascii_whitespace) {
        CancelBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(e.to_string()))?
    };
    let registry = state.orchestrator.registry();
    let signalled = match body.ingest_id {
        Some(id) => usize::from(registry.cancel(&IngestHandle::from(id.as_str()))),
        None => registry.cancel_all(),
    };
    tracing::info!(signalled, "cancellation requested");
    Ok(Json(CancelResponse {
        status: "cancellation_requested",
        signalled,
    }))
}

// ============ POST /search ============

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub video_id: String,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub video_id: String,
    pub query: String,
    pub hits: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if body.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }
    let hits = state
        .engine
        .search(&body.video_id, &body.query, body.top_k)
        .await
        .map_err(classify)?;
    Ok(Json(SearchResponse {
        video_id: body.video_id,
        query: body.query,
        hits,
    }))
}

// ============ POST /rag/search ============

#[derive(Debug, Deserialize)]
pub struct RagBody {
    pub video_id: String,
    pub query: String,
    #[serde(default = "default_rag_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub llm_model: Option<String>,
}

fn default_rag_top_k() -> usize {
    5
}

async fn handle_rag_search(
    State(state): State<AppState>,
    Json(body): Json<RagBody>,
) -> Result<Json<RagAnswer>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let layout = state.orchestrator.layout();
    let answer = match body.llm_model.as_deref() {
        Some(model) => {
            let model = state.answer_model.with_model(model);
            answer_question(layout, &body.video_id, &body.query, body.top_k, &model).await
        }
        None => {
            answer_question(
                layout,
                &body.video_id,
                &body.query,
                body.top_k,
                state.answer_model.as_ref(),
            )
            .await
        }
    }
    .map_err(classify)?;
    Ok(Json(answer))
}

// ============ GET /videos/{id}/meta ============

async fn handle_meta(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VideoMetaResponse>, AppError> {
    Ok(Json(get_video_meta(state.orchestrator.layout(), &id).await?))
}

// ============ GET /health/vectorstore ============

async fn handle_store_health(
    State(state): State<AppState>,
) -> Result<Json<VectorStoreHealth>, AppError> {
    vector_store_health(&state.config)
        .await
        .map(Json)
        .map_err(classify)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_status_codes() {
        let e: AppError = StoreError::NotFound("v".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        let e: AppError = StoreError::Unreachable {
            endpoint: "http://q".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn wrapped_errors_are_classified_by_type() {
        let err = anyhow::Error::from(IngestError::NotFound("index".into())).context("rag failed");
        assert_eq!(classify(err).status, StatusCode::NOT_FOUND);
        let err = anyhow::anyhow!("boom");
        assert_eq!(classify(err).status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_source_kind_is_bad_request() {
        let err = "ftp".parse::<SourceKind>().unwrap_err();
        assert_eq!(AppError::from(err).status, StatusCode::BAD_REQUEST);
    }
}
