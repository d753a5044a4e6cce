//! Defines routes for all S3-like bucket and object operations.
//!
//! ## Structure
//! - **Service endpoint**
//!   - `GET    /` — list buckets
//!
//! - **Health endpoints** (underscores keep them out of the bucket namespace)
//!   - `GET    /_healthz` — liveness
//!   - `GET    /_readyz` — backend readiness
//!
//! - **Bucket-level endpoints** (trailing slash optional)
//!   - `GET    /{bucket}/` — list objects (supports prefix, marker, max-keys, terse)
//!   - `PUT    /{bucket}/` — create bucket
//!   - `DELETE /{bucket}/` — delete bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}` — upload object
//!   - `GET    /{bucket}/{*key}` — download object
//!   - `HEAD   /{bucket}/{*key}` — retrieve metadata only
//!   - `DELETE /{bucket}/{*key}` — delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`; keys
//! are percent-decoded by the path extractor.

use crate::{
    auth::require_auth,
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, list_buckets, list_objects},
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, upload_object},
    },
    routes::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::Uri,
    middleware,
    routing::{get, put},
};
use tower::util::MapRequest;

/// The full application: router plus bucket-path normalization.
pub type App = MapRequest<Router, fn(Request) -> Request>;

/// Build the router for all S3-compatible routes.
///
/// Authentication wraps the S3 routes only; health checks stay open.
pub fn routes(state: AppState, max_object_bytes: usize) -> Router {
    Router::new()
        .route("/", get(list_buckets))
        // Object-level routes
        .route(
            "/{bucket}/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects).put(create_bucket).delete(delete_bucket),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        // health endpoints; `_` is never valid in a bucket name
        .route("/_healthz", get(healthz))
        .route("/_readyz", get(readyz))
        .layer(DefaultBodyLimit::max(max_object_bytes))
        .with_state(state)
}

/// Router wrapped so `/{bucket}/` reaches the bucket routes. Routing happens
/// after this rewrite, so it cannot be a router layer.
pub fn app(state: AppState, max_object_bytes: usize) -> App {
    tower::ServiceExt::map_request(
        routes(state, max_object_bytes),
        normalize_bucket_path as fn(Request) -> Request,
    )
}

/// Rewrite `/{bucket}/` to `/{bucket}`, keeping the query string.
fn normalize_bucket_path(mut request: Request) -> Request {
    let path = request.uri().path();
    let Some(bucket) = path
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
    else {
        return request;
    };
    if bucket.is_empty() || bucket.contains('/') {
        return request;
    }

    let rewritten = match request.uri().query() {
        Some(query) => format!("/{}?{}", bucket, query),
        None => format!("/{}", bucket),
    };
    let mut parts = request.uri().clone().into_parts();
    match rewritten.parse() {
        Ok(path_and_query) => parts.path_and_query = Some(path_and_query),
        Err(_) => return request,
    }
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{AllowAll, AuthError, AuthRequest, Authenticator},
        services::storage::fs::LocalFsBackend,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, StatusCode, header},
        response::Response,
    };
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct DenyAll;

    impl Authenticator for DenyAll {
        fn authenticate(&self, _request: &AuthRequest<'_>) -> Result<(), AuthError> {
            Err(AuthError::Denied)
        }
    }

    async fn test_app(auth: Arc<dyn Authenticator>, max_object_bytes: usize) -> (TempDir, App) {
        let dir = TempDir::new().unwrap();
        let storage = LocalFsBackend::init(dir.path(), 1).await.unwrap();
        let state = AppState {
            storage: Arc::new(storage),
            auth,
        };
        (dir, app(state, max_object_bytes))
    }

    async fn send(app: &App, method: Method, uri: &str, body: &'static [u8]) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn normalizes_only_single_segment_bucket_paths() {
        let cases = [
            ("/photos/", "/photos"),
            ("/photos/?max-keys=2&prefix=a", "/photos?max-keys=2&prefix=a"),
            ("/photos", "/photos"),
            ("/photos/a.jpg", "/photos/a.jpg"),
            ("/photos/a/", "/photos/a/"),
            ("/", "/"),
        ];
        for (input, expected) in cases {
            let request = Request::builder().uri(input).body(Body::empty()).unwrap();
            assert_eq!(normalize_bucket_path(request).uri(), expected, "{input}");
        }
    }

    #[tokio::test]
    async fn bucket_and_object_lifecycle() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;

        let response = send(&app, Method::PUT, "/photos/", b"").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, Method::PUT, "/photos/", b"").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("<Code>BucketAlreadyExists</Code>"));

        for key in ["c.jpg", "a.jpg", "b.jpg"] {
            let response = send(&app, Method::PUT, &format!("/photos/{key}"), b"jpeg").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()[header::ETAG],
                format!("\"{:x}\"", md5::compute(b"jpeg")).as_str()
            );
        }

        let response = send(&app, Method::GET, "/photos/a.jpg", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_text(response).await, "jpeg");

        let response = send(&app, Method::HEAD, "/photos/a.jpg", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "4");

        let response = send(&app, Method::GET, "/photos/?max-keys=2", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("<Marker>b.jpg</Marker><MaxKeys>2</MaxKeys><IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<Key>a.jpg</Key>"));
        assert!(!xml.contains("<Key>c.jpg</Key>"));

        let response = send(&app, Method::GET, "/photos?marker=b.jpg&terse=1", b"").await;
        let xml = body_text(response).await;
        assert!(xml.contains("<Contents><Key>c.jpg</Key></Contents>"));
        assert!(xml.contains("<IsTruncated>false</IsTruncated>"));

        let response = send(&app, Method::GET, "/", b"").await;
        assert!(body_text(response).await.contains("<Bucket><Name>photos</Name>"));

        let response = send(&app, Method::DELETE, "/photos/", b"").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("<Code>BucketNotEmpty</Code>"));

        for key in ["a.jpg", "b.jpg", "c.jpg"] {
            let response = send(&app, Method::DELETE, &format!("/photos/{key}"), b"").await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        let response = send(&app, Method::DELETE, "/photos/a.jpg", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, Method::DELETE, "/photos/", b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, Method::DELETE, "/photos/", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_bucket_and_object_are_not_found() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;

        let response = send(&app, Method::PUT, "/nowhere/a.txt", b"data").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("<Code>NoSuchBucket</Code>"));

        send(&app, Method::PUT, "/docs/", b"").await;
        let response = send(&app, Method::GET, "/docs/never.txt", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("<Code>NoSuchKey</Code>"));

        let response = send(&app, Method::GET, "/nowhere/", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn keys_are_percent_decoded() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;
        send(&app, Method::PUT, "/docs/", b"").await;

        let response = send(&app, Method::PUT, "/docs/2024%2Fjan%20notes.txt", b"hi").await;
        assert_eq!(response.status(), StatusCode::OK);

        let xml = body_text(send(&app, Method::GET, "/docs/?terse=1", b"").await).await;
        assert!(xml.contains("<Key>2024/jan notes.txt</Key>"));

        let response = send(&app, Method::GET, "/docs/2024/jan%20notes.txt", b"").await;
        assert_eq!(body_text(response).await, "hi");
    }

    #[tokio::test]
    async fn invalid_names_are_bad_requests() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;

        let response = send(&app, Method::PUT, "/Not_A_Bucket/", b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("<Code>InvalidBucketName</Code>"));

        send(&app, Method::PUT, "/docs/", b"").await;
        let response = send(&app, Method::GET, "/docs/?max-keys=lots", b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 4).await;
        send(&app, Method::PUT, "/docs/", b"").await;

        let response = send(&app, Method::PUT, "/docs/big.bin", b"12345").await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let response = send(&app, Method::PUT, "/docs/small.bin", b"1234").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn policy_guards_s3_routes_but_not_health_checks() {
        let (_dir, app) = test_app(Arc::new(DenyAll), 1024).await;

        let response = send(&app, Method::GET, "/", b"").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("<Code>AccessDenied</Code>"));

        let response = send(&app, Method::GET, "/_healthz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&app, Method::GET, "/_readyz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn health_names_are_ordinary_buckets() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;

        for bucket in ["healthz", "readyz"] {
            let response = send(&app, Method::PUT, &format!("/{bucket}/"), b"").await;
            assert_eq!(response.status(), StatusCode::OK);
            let response = send(&app, Method::PUT, &format!("/{bucket}/a.txt"), b"a").await;
            assert_eq!(response.status(), StatusCode::OK);

            let response = send(&app, Method::GET, &format!("/{bucket}"), b"").await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_text(response).await;
            assert!(body.contains(&format!("<Name>{bucket}</Name>")));
            assert!(body.contains("<Key>a.txt</Key>"));
        }

        let response = send(&app, Method::GET, "/", b"").await;
        let body = body_text(response).await;
        assert!(body.contains("<Name>healthz</Name>"));
        assert!(body.contains("<Name>readyz</Name>"));

        let response = send(&app, Method::GET, "/_readyz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));
        let response = send(&app, Method::PUT, "/_status/", b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_authorization_is_treated_as_anonymous() {
        let (_dir, app) = test_app(Arc::new(AllowAll), 1024).await;

        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "AWS no-signature")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "AWS AKID:sig")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
