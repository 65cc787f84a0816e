//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | `{message}` → `{answer, success, message}` |
//! | `GET`  | `/health` | `healthy` once the pipeline is initialized, `unhealthy` otherwise |
//! | `GET`  | `/status` | active model, embedding model, cache and index details |
//! | `GET`  | `/` | service banner and endpoint list |
//!
//! # Error Contract
//!
//! Request errors use one JSON shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Pergunta não pode estar vazia" } }
//! ```
//!
//! Codes: `bad_request` (400, also for bodies that are not `{"message": ...}`
//! JSON), `not_ready` (503). Anything that goes wrong
//! while composing an answer is reported inside a normal `/chat` response
//! with `success: false`, never as an HTTP error.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer::{ChatResponse, Pipeline, PipelineStatus, EMPTY_MESSAGE};
use crate::builder::ensure_index;
use crate::config::Config;

/// Shared handler state. The server starts even when initialization
/// failed, so `/health` can report why.
#[derive(Clone)]
pub struct AppState {
    pipeline: Option<Arc<Pipeline>>,
    init_error: Option<String>,
}

impl AppState {
    pub fn ready(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Some(Arc::new(pipeline)),
            init_error: None,
        }
    }

    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            pipeline: None,
            init_error: Some(format!("{:#}", err)),
        }
    }
}

/// Build the index if needed, initialize the pipeline, and serve until the
/// process is terminated.
pub async fn run_server(config: &Config, rebuild: bool) -> anyhow::Result<()> {
    let state = match initialize(config, rebuild).await {
        Ok(pipeline) => AppState::ready(pipeline),
        Err(e) => {
            error!(error = %format!("{:#}", e), "initialization failed, serving as unhealthy");
            AppState::failed(&e)
        }
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "listening");
    println!("World Cup RAG API listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn initialize(config: &Config, rebuild: bool) -> anyhow::Result<Pipeline> {
    if let Some(report) = ensure_index(config, rebuild).await? {
        info!(
            chunks = report.manifest.chunk_count,
            model = %report.manifest.embedding_model,
            "index built at startup"
        );
    }
    Pipeline::from_config(config).await
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .layer(cors)
        .with_state(state)
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

struct AppError {
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

fn not_ready(state: &AppState) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "not_ready",
        message: format!(
            "Sistema não inicializado: {}",
            state.init_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let pipeline = state.pipeline.as_ref().ok_or_else(|| not_ready(&state))?;
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    if request.message.trim().is_empty() {
        return Err(bad_request(EMPTY_MESSAGE));
    }
    Ok(Json(pipeline.answer(&request.message).await))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    match (&state.pipeline, &state.init_error) {
        (Some(p), _) => Json(HealthResponse {
            status: "healthy",
            message: format!("API funcionando com o modelo {}", p.active_model().name),
        }),
        (None, err) => Json(HealthResponse {
            status: "unhealthy",
            message: format!(
                "Sistema não inicializado completamente: {}",
                err.as_deref().unwrap_or("unknown error")
            ),
        }),
    }
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    system: &'static str,
    version: &'static str,
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    pipeline: Option<PipelineStatus>,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        system: "World Cup RAG API",
        version: env!("CARGO_PKG_VERSION"),
        ready: state.pipeline.is_some(),
        error: state.init_error.clone(),
        pipeline: state.pipeline.as_ref().map(|p| p.status()),
    })
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "World Cup RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Assistente de perguntas sobre a Copa do Mundo FIFA com recuperação de contexto",
        "endpoints": {
            "chat": "/chat",
            "health": "/health",
            "status": "/status",
        }
    }))
}
