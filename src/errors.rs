use crate::services::{
    projector::{error_document, render_document},
    storage::{ErrorKind, StorageError},
};
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

/// An HTTP-facing error: status line plus the S3 error code and message
/// rendered into the `<Error>` body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidArgument", msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "AccessDenied", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = render_document(&error_document(self.code, &self.message));
        let mut response = (self.status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=UTF-8"),
        );
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match (err.kind(), &err) {
            (ErrorKind::NotFound, StorageError::ObjectNotFound { .. }) => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
            }
            (ErrorKind::NotFound, _) => Self::new(StatusCode::NOT_FOUND, "NoSuchBucket", message),
            (ErrorKind::AlreadyExists, _) => {
                Self::new(StatusCode::FORBIDDEN, "BucketAlreadyExists", message)
            }
            (ErrorKind::NotEmpty, _) => {
                Self::new(StatusCode::FORBIDDEN, "BucketNotEmpty", message)
            }
            (ErrorKind::InvalidArgument, StorageError::InvalidBucketName { .. }) => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidBucketName", message)
            }
            (ErrorKind::InvalidArgument, _) => Self::invalid_argument(message),
            (ErrorKind::BackendUnavailable, _) => {
                tracing::error!("storage backend failure: {}", message);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ServiceUnavailable",
                    "storage backend unavailable, retry later",
                )
            }
        }
    }
}
