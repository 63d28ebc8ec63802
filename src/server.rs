//! Read-only HTTP surface over the embedding store.
//!
//! Exposes the persisted records for downstream consumers (search UIs, the
//! publishing automation) without giving them a write path — records are
//! only ever created by the producers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/records` | List records; filters: `origin`, `q`, `limit` |
//! | `GET`  | `/records/{id}` | Fetch a single record |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Records are returned in their full JSON representation: `id`, `origin`,
//! `content`, `title`, `vector` (flat numeric array), `metadata`,
//! `created_at`, `updated_at`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::models::{EmbeddingRecord, Origin};
use crate::store::Store;

#[derive(Clone)]
struct AppState {
    store: Store,
}

/// Start the read-only records server. Runs until the process is terminated.
pub async fn run_server(config: &Config, store: Store) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/records", get(handle_list_records))
        .route("/records/{id}", get(handle_get_record))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { store });

    info!(bind = %bind_addr, "records server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
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

// ============ GET /records ============

#[derive(Deserialize)]
struct ListParams {
    origin: Option<String>,
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct RecordListResponse {
    records: Vec<EmbeddingRecord>,
}

async fn handle_list_records(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<RecordListResponse>, AppError> {
    let origin = match &params.origin {
        Some(raw) => Some(raw.parse::<Origin>().map_err(bad_request)?),
        None => None,
    };

    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let records = state
        .store
        .list(origin, params.q.as_deref(), limit)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(RecordListResponse { records }))
}

// ============ GET /records/{id} ============

async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EmbeddingRecord>, AppError> {
    let record = state
        .store
        .get(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no record with id: {}", id)))?;

    Ok(Json(record))
}
