//! HTTP handlers for object operations.
//! Payloads are buffered whole; upload size is capped by the router's body
//! limit.

use crate::{
    errors::AppError,
    models::object::ObjectStat,
    routes::AppState,
    services::projector::last_modified_header,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::info;

/// PUT `/{bucket}/{*key}` — store an object, replacing any previous one.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!(
        "Writing object {} on bucket {} ({} bytes)",
        key,
        bucket,
        body.len()
    );
    let outcome = state.storage.write_object(&bucket, &key, body).await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", outcome.etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok((StatusCode::OK, headers))
}

/// GET `/{bucket}/{*key}` — object payload with its Last-Modified header.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let stat = state.storage.stat_object(&bucket, &key).await?;
    let payload = state.storage.read_object(&bucket, &key).await?;

    let length = payload.len() as u64;
    let mut response = Response::new(Body::from(payload));
    set_object_headers(response.headers_mut(), &stat, length);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let stat = state.storage.stat_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &stat, stat.size);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}` — 204 when removed, 404 when it was absent.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    info!("Deleting object {} from bucket {}", key, bucket);
    if state.storage.delete_object(&bucket, &key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "NoSuchKey",
            format!("object `{}` not found in bucket `{}`", key, bucket),
        ))
    }
}

fn set_object_headers(headers: &mut HeaderMap, stat: &ObjectStat, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&last_modified_header(stat)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
