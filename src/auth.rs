//! Request authentication.
//!
//! Signature verification is out of scope: the shipped policy is
//! [`AllowAll`], which only extracts the caller's access key for logging.
//! Other policies plug in through [`AppState::auth`](crate::routes::AppState).

use crate::{errors::AppError, routes::AppState};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Credentials parsed from an `Authorization: AWS <access>:<signature>`
/// header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub signature: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header is not valid UTF-8")]
    NotText,
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,
    #[error("authorization header must be `AWS <access key>:<signature>`")]
    Malformed,
    #[error("access denied")]
    Denied,
}

/// What a policy gets to look at.
#[derive(Debug)]
pub struct AuthRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// `None` for anonymous requests.
    pub credentials: Option<Credentials>,
}

/// Admission policy applied to every S3 request.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &AuthRequest<'_>) -> Result<(), AuthError>;
}

/// Admits every request, signed or not.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _request: &AuthRequest<'_>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Parse the legacy S3 `Authorization` header.
pub fn parse_authorization(headers: &HeaderMap) -> Result<Option<Credentials>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::NotText)?;
    let rest = value
        .strip_prefix("AWS ")
        .ok_or(AuthError::UnsupportedScheme)?;
    let (access_key, signature) = rest.trim().split_once(':').ok_or(AuthError::Malformed)?;
    if access_key.is_empty() || signature.is_empty() {
        return Err(AuthError::Malformed);
    }

    Ok(Some(Credentials {
        access_key: access_key.to_string(),
        signature: signature.to_string(),
    }))
}

/// Middleware running the configured [`Authenticator`].
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Unparseable credentials are treated as anonymous; the policy decides.
    let credentials = parse_authorization(request.headers()).unwrap_or_else(|err| {
        warn!("ignoring authorization header: {}", err);
        None
    });
    let auth = AuthRequest {
        method: request.method(),
        path: request.uri().path(),
        credentials,
    };

    debug!(
        "{} {} by {}",
        auth.method,
        auth.path,
        auth.credentials
            .as_ref()
            .map(|c| c.access_key.as_str())
            .unwrap_or("anonymous")
    );
    state
        .auth
        .authenticate(&auth)
        .map_err(|e| AppError::access_denied(e.to_string()))?;

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn anonymous_requests_have_no_credentials() {
        assert_eq!(parse_authorization(&HeaderMap::new()), Ok(None));
    }

    #[test]
    fn parses_access_key_and_signature() {
        let creds = parse_authorization(&headers("AWS AKID:c2lnbmF0dXJl"))
            .unwrap()
            .unwrap();
        assert_eq!(creds.access_key, "AKID");
        assert_eq!(creds.signature, "c2lnbmF0dXJl");
    }

    #[test]
    fn rejects_other_schemes_and_malformed_values() {
        assert_eq!(
            parse_authorization(&headers("Bearer token")),
            Err(AuthError::UnsupportedScheme)
        );
        assert_eq!(
            parse_authorization(&headers("AWS AKID")),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            parse_authorization(&headers("AWS :sig")),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn allow_all_admits_everyone() {
        let request = AuthRequest {
            method: &Method::DELETE,
            path: "/photos",
            credentials: None,
        };
        assert!(AllowAll.authenticate(&request).is_ok());
    }
}
