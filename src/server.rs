//! HTTP tool server for the conversational layer.
//!
//! Exposes the knowledge engine as a small JSON API suitable for a chat
//! assistant's tool-calling loop. The auth/session provider in front of
//! this service resolves the caller and forwards an opaque user identifier
//! in the `x-user-id` header; a request without one is refused before any
//! store access.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/knowledge_search` | Rank stored passages against a query |
//! | `POST` | `/tools/upload_document` | Ingest a base64-encoded file |
//! | `GET`  | `/tools/documents` | List the caller's documents |
//! | `DELETE` | `/tools/documents/{id}` | Delete one document (cascades to chunks) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses use machine-readable codes:
//!
//! ```json
//! { "error": { "code": "file_too_large", "message": "file too large: ..." } }
//! ```
//!
//! A search call never produces a tool error once authenticated — failures
//! come back inside the `SearchResponse` bundle, which the conversational
//! layer can always render.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::KnowledgeError;
use crate::ingest;
use crate::search::{self, SearchRequest, SearchResponse};
use crate::store::KnowledgeStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: KnowledgeStore,
    embedder: Arc<dyn Embedder>,
}

/// Start the tool server. Binds to `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(
    config: &Config,
    store: KnowledgeStore,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        embedder,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/knowledge_search", post(handle_search))
        .route("/tools/upload_document", post(handle_upload))
        .route("/tools/documents", get(handle_list_documents))
        .route("/tools/documents/{id}", delete(handle_delete_document))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = bind_addr.as_str(), "tool server listening");
    println!("Tool server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"file_too_large"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        let status = match &err {
            KnowledgeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            KnowledgeError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            KnowledgeError::UnsupportedFileType { .. }
            | KnowledgeError::ExtractionFailed { .. }
            | KnowledgeError::EmptyContent => StatusCode::UNPROCESSABLE_ENTITY,
            KnowledgeError::EmbeddingTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            KnowledgeError::EmbeddingProvider { .. } | KnowledgeError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
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

/// Pull the opaque authenticated-user identifier out of the request.
/// The engine treats "no identifier" as an unauthenticated caller.
fn user_id_from_headers(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::from(KnowledgeError::Unauthenticated))
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

// ============ POST /tools/knowledge_search ============

/// Once the caller is authenticated this always returns 200 with a
/// well-formed [`SearchResponse`] — downstream failures are reported
/// inside the bundle, never as a transport error.
async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;

    let response = search::search_knowledge(
        &state.store,
        state.embedder.as_ref(),
        &state.config.retrieval,
        Some(&user_id),
        &request,
    )
    .await?;

    Ok(Json(response))
}

// ============ POST /tools/upload_document ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// Raw file bytes, base64-encoded for JSON transport.
    content_base64: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UploadRequest>,
) -> Result<Json<ingest::IngestReport>, AppError> {
    let user_id = user_id_from_headers(&headers)?;

    if request.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&request.content_base64)
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let report = ingest::ingest_file(
        &state.config,
        &state.store,
        state.embedder.clone(),
        Some(&user_id),
        &bytes,
        &request.filename,
    )
    .await?;

    Ok(Json(report))
}

// ============ GET /tools/documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentInfo>,
    total: usize,
}

#[derive(Serialize)]
struct DocumentInfo {
    id: String,
    title: String,
    file_type: String,
    file_size: u64,
    created_at: i64,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DocumentListResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;

    let documents: Vec<DocumentInfo> = state
        .store
        .documents_for_user(&user_id)
        .await?
        .into_iter()
        .map(|d| DocumentInfo {
            id: d.id,
            title: d.title,
            file_type: d.file_type.to_string(),
            file_size: d.file_size,
            created_at: d.created_at,
        })
        .collect();

    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

// ============ DELETE /tools/documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
    id: String,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let user_id = user_id_from_headers(&headers)?;

    let deleted = state.store.delete_document(&user_id, &id).await?;
    if !deleted {
        return Err(not_found(format!("no document with id {}", id)));
    }

    Ok(Json(DeleteResponse { deleted, id }))
}
