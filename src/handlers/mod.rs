pub mod bucket_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::services::projector::{Value, render_document};
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Render `document` as a 200 `application/xml` response.
pub(crate) fn xml_response(document: &Value) -> Response {
    let mut response = (StatusCode::OK, render_document(document)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=UTF-8"),
    );
    response
}
