//! External blob service holding object payloads.
//!
//! The service is content-agnostic: it accepts a payload and hands back an
//! opaque location, which the distributed backend records in metadata.

use crate::{
    models::object::BlobLocation,
    services::storage::{StorageError, StorageResult},
};
use anyhow::{Context, ensure};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, Url, header};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "blob service";

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(&self, payload: Bytes) -> StorageResult<BlobLocation>;

    /// Fetch a payload. A location that no longer resolves is reported as
    /// `MissingBlob`: metadata pointing at nothing is a medium failure, not
    /// an absent object.
    async fn fetch(&self, location: &BlobLocation) -> StorageResult<Bytes>;

    /// Delete a payload. Deleting an already-absent blob succeeds.
    async fn delete(&self, location: &BlobLocation) -> StorageResult<()>;

    async fn ping(&self) -> StorageResult<()>;
}

/// Client for a Luwak-style HTTP blob service: `POST /luwak` stores a
/// payload and answers with its location in the `Location` header, which is
/// then addressed directly with `GET`/`DELETE`.
pub struct HttpBlobStore {
    client: Client,
    base: Url,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parsing {}", base_url))?;
        ensure!(!base.cannot_be_a_base(), "`{}` cannot be a base url", base_url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building blob service http client")?;
        Ok(Self { client, base })
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Resolve a location (`luwak/<id>`) against the base url.
    fn location_url(&self, location: &BlobLocation) -> Url {
        self.url(location.0.split('/').filter(|s| !s.is_empty()))
    }

    fn expect_success(response: &Response, operation: &'static str) -> StorageResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StorageError::UnexpectedStatus {
                service: SERVICE,
                operation,
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn name(&self) -> &'static str {
        "luwak"
    }

    async fn upload(&self, payload: Bytes) -> StorageResult<BlobLocation> {
        let response = self
            .client
            .post(self.url(["luwak"]))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        Self::expect_success(&response, "upload")?;

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_start_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| StorageError::MalformedResponse {
                service: SERVICE,
                operation: "upload",
                detail: "missing Location header".into(),
            })?;
        debug!("stored blob at {}", location);
        Ok(BlobLocation(location))
    }

    async fn fetch(&self, location: &BlobLocation) -> StorageResult<Bytes> {
        let response = self.client.get(self.location_url(location)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::MissingBlob(location.clone()));
        }
        Self::expect_success(&response, "fetch")?;
        Ok(response.bytes().await?)
    }

    async fn delete(&self, location: &BlobLocation) -> StorageResult<()> {
        let response = self
            .client
            .delete(self.location_url(location))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("blob {} already gone", location);
            return Ok(());
        }
        Self::expect_success(&response, "delete")
    }

    async fn ping(&self) -> StorageResult<()> {
        let response = self.client.get(self.url(["ping"])).send().await?;
        Self::expect_success(&response, "ping")
    }
}
