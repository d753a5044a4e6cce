//! Health & readiness handlers.
//!
//! - GET /_healthz -> simple liveness ("ok")
//! - GET /_readyz  -> readiness that round-trips the storage backend

use crate::routes::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::warn;

/// `GET /_healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /_readyz`
///
/// HTTP 200 when the backend answers its health check, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.storage.name();
    let (status, error) = match state.storage.health_check().await {
        Ok(()) => (StatusCode::OK, None),
        Err(err) => {
            warn!("readiness check against {} failed: {}", backend, err);
            (StatusCode::SERVICE_UNAVAILABLE, Some(err.to_string()))
        }
    };

    let body = ReadyResponse {
        status: if error.is_none() {
            "ok".into()
        } else {
            "error".into()
        },
        backend,
        error,
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
