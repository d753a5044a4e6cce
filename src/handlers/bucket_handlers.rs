//! HTTP handlers for the service root and bucket-level operations.

use super::xml_response;
use crate::{
    errors::AppError,
    models::listing::{DEFAULT_MAX_KEYS, ListObjectsParams},
    routes::AppState,
    services::projector::{list_buckets_document, list_objects_document},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

/// Query params accepted by `GET /{bucket}/`.
///
/// Numbers are taken as text so malformed values surface as
/// `InvalidArgument` documents rather than plain-text rejections.
#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<String>,
    pub terse: Option<String>,
}

impl ListObjectsQuery {
    fn into_params(self) -> Result<ListObjectsParams, AppError> {
        let max_keys = match self.max_keys.as_deref() {
            None | Some("") => DEFAULT_MAX_KEYS,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::invalid_argument(format!("invalid max-keys `{}`", raw)))?,
        };
        let terse = match self.terse.as_deref() {
            None | Some("") => false,
            Some(raw) => match raw.parse::<i64>() {
                Ok(flag) => flag != 0,
                Err(_) => {
                    return Err(AppError::invalid_argument(format!(
                        "invalid terse `{}`",
                        raw
                    )));
                }
            },
        };

        Ok(ListObjectsParams {
            marker: self.marker.unwrap_or_default(),
            prefix: self.prefix.unwrap_or_default(),
            max_keys,
            terse,
        })
    }
}

/// GET `/` — list all buckets.
pub async fn list_buckets(State(state): State<AppState>) -> Result<Response, AppError> {
    let buckets = state.storage.list_buckets().await?;
    Ok(xml_response(&list_buckets_document(&buckets)))
}

/// GET `/{bucket}/` — list objects, supports ?prefix=&marker=&max-keys=&terse=
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Response, AppError> {
    let params = query.into_params()?;
    let result = state.storage.list_objects(&bucket, &params).await?;
    Ok(xml_response(&list_objects_document(&result)))
}

/// PUT `/{bucket}/` — create bucket, 403 when it already exists.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!("Creating bucket {}", bucket);
    state.storage.create_bucket(&bucket).await?;
    Ok(StatusCode::OK)
}

/// DELETE `/{bucket}/` — delete an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!("Deleting bucket {}", bucket);
    state.storage.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}
