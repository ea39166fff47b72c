use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{error, warn};

use crate::engine::GraphEngine;
use crate::errors::EngineError;
use crate::history::HistorySink;
use crate::interrupt::{Decision, InterruptController, ResumeInput};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub engine: GraphEngine,
    pub interrupts: InterruptController,
    pub history: Arc<dyn HistorySink>,
}

impl AppState {
    pub fn new(engine: GraphEngine) -> Self {
        Self {
            interrupts: engine.interrupts(),
            history: engine.history().clone(),
            engine,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StartThreadRequest {
    pub intent: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::ThreadNotFound { .. } => ApiError::NotFound(message),
            EngineError::InvalidInput(_) => ApiError::BadRequest(message),
            EngineError::NotAwaitingDecision { .. }
            | EngineError::IterationCapReached { .. }
            | EngineError::TerminalState { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::StaleWrite { .. } => ApiError::Conflict(message),
            _ => {
                error!(error = %message, "request failed");
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/threads", get(list_threads).post(start_thread))
        .route("/api/threads/{id}", get(get_thread))
        .route("/api/threads/{id}/stream", get(stream_thread))
        .route("/api/threads/{id}/resume", post(resume_thread))
        .route("/api/history", get(list_history))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn start_thread(
    State(state): State<SharedState>,
    Json(req): Json<StartThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let thread_id = state.engine.start(&req.intent).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"thread_id": thread_id})),
    ))
}

async fn list_threads(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let threads = state.engine.list().await?;
    Ok(Json(threads))
}

async fn get_thread(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checkpoint = state.engine.get(&id).await?;
    Ok(Json(checkpoint))
}

/// Drive the thread and forward each event as an SSE `data:` frame.
async fn stream_thread(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.engine.get(&id).await?;

    let events = state.engine.stream(&id).map(|event| {
        let frame = Event::default().json_data(&event).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode stream event");
            Event::default().data(r#"{"type":"error","message":"encoding failed"}"#)
        });
        Ok(frame)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn resume_thread(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(input): Json<ResumeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = Decision::try_from(input)?;
    let checkpoint = state.interrupts.resume(&id, decision).await?;
    Ok(Json(serde_json::json!({
        "status": "updated",
        "thread_id": id,
        "thread_status": checkpoint.snapshot.status,
        "pending": checkpoint.pending,
        "step_seq": checkpoint.step_seq,
    })))
}

async fn list_history(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .history
        .list()
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(entries))
}
