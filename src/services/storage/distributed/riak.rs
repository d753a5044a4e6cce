//! Metadata store speaking Riak's HTTP key/value interface.

use super::metadata::MetadataStore;
use crate::services::storage::{StorageError, StorageResult};
use anyhow::{Context, ensure};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "metadata store";

pub struct RiakMetadataStore {
    client: Client,
    base: Url,
}

#[derive(Deserialize)]
struct BucketsResponse {
    buckets: Vec<String>,
}

#[derive(Deserialize)]
struct KeysResponse {
    keys: Vec<String>,
}

impl RiakMetadataStore {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parsing {}", base_url))?;
        ensure!(!base.cannot_be_a_base(), "`{}` cannot be a base url", base_url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building metadata store http client")?;
        Ok(Self { client, base })
    }

    /// `base/segment/...`, each segment percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn key_url(&self, namespace: &str, key: &str) -> Url {
        self.url(&["buckets", namespace, "keys", key])
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

    async fn json<T: serde::de::DeserializeOwned>(
        response: Response,
        operation: &'static str,
    ) -> StorageResult<T> {
        Self::expect_success(&response, operation)?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| StorageError::MalformedResponse {
            service: SERVICE,
            operation,
            detail: err.to_string(),
        })
    }
}

#[async_trait]
impl MetadataStore for RiakMetadataStore {
    fn name(&self) -> &'static str {
        "riak"
    }

    async fn list_namespaces(&self) -> StorageResult<Vec<String>> {
        let mut url = self.url(&["buckets"]);
        url.set_query(Some("buckets=true"));
        let response = self.client.get(url).send().await?;
        let body: BucketsResponse = Self::json(response, "list buckets").await?;
        Ok(body.buckets)
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let mut url = self.url(&["buckets", namespace, "keys"]);
        url.set_query(Some("keys=true"));
        let response = self.client.get(url).send().await?;
        let body: KeysResponse = Self::json(response, "list keys").await?;
        debug!("{} keys in namespace {}", body.keys.len(), namespace);
        Ok(body.keys)
    }

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let response = self.client.get(self.key_url(namespace, key)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_success(&response, "get")?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let response = self
            .client
            .put(self.key_url(namespace, key))
            .header(header::CONTENT_TYPE, "application/json")
            .body(value)
            .send()
            .await?;
        Self::expect_success(&response, "put")
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let response = self
            .client
            .delete(self.key_url(namespace, key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect_success(&response, "delete")?;
        Ok(true)
    }

    async fn ping(&self) -> StorageResult<()> {
        let response = self.client.get(self.url(&["ping"])).send().await?;
        Self::expect_success(&response, "ping")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        body::Bytes,
        extract::{Path, State},
        http::StatusCode as Status,
        routing::get,
    };
    use serde_json::{Value, json};
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    type Kv = Arc<Mutex<BTreeMap<(String, String), Vec<u8>>>>;

    /// Just enough of Riak's HTTP interface to drive the client.
    async fn fake_riak() -> String {
        let kv: Kv = Arc::default();
        let app = Router::new()
            .route("/ping", get(|| async { "OK" }))
            .route(
                "/buckets",
                get(|State(kv): State<Kv>| async move {
                    let kv = kv.lock().unwrap();
                    let mut buckets: Vec<String> = kv.keys().map(|(ns, _)| ns.clone()).collect();
                    buckets.dedup();
                    Json(json!({ "buckets": buckets }))
                }),
            )
            .route(
                "/buckets/{ns}/keys",
                get(|State(kv): State<Kv>, Path(ns): Path<String>| async move {
                    let kv = kv.lock().unwrap();
                    let keys: Vec<Value> = kv
                        .keys()
                        .filter(|(n, _)| *n == ns)
                        .rev()
                        .map(|(_, k)| json!(k))
                        .collect();
                    Json(json!({ "keys": keys }))
                }),
            )
            .route(
                "/buckets/{ns}/keys/{key}",
                get(
                    |State(kv): State<Kv>, Path((ns, key)): Path<(String, String)>| async move {
                        match kv.lock().unwrap().get(&(ns, key)) {
                            Some(value) => Ok(value.clone()),
                            None => Err(Status::NOT_FOUND),
                        }
                    },
                )
                .put(
                    |State(kv): State<Kv>,
                     Path((ns, key)): Path<(String, String)>,
                     body: Bytes| async move {
                        kv.lock().unwrap().insert((ns, key), body.to_vec());
                        Status::NO_CONTENT
                    },
                )
                .delete(
                    |State(kv): State<Kv>, Path((ns, key)): Path<(String, String)>| async move {
                        match kv.lock().unwrap().remove(&(ns, key)) {
                            Some(_) => Status::NO_CONTENT,
                            None => Status::NOT_FOUND,
                        }
                    },
                ),
            )
            .with_state(kv);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn speaks_riak_http_interface() {
        let base = fake_riak().await;
        let store = RiakMetadataStore::new(&base, Duration::from_secs(5)).unwrap();

        store.ping().await.unwrap();
        assert_eq!(store.get("photos", "a.jpg").await.unwrap(), None);

        store.put("photos", "a.jpg", b"{}".to_vec()).await.unwrap();
        store
            .put("photos", "dir/b c.jpg", b"{\"x\":1}".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get("photos", "dir/b c.jpg").await.unwrap(),
            Some(b"{\"x\":1}".to_vec())
        );
        assert_eq!(store.list_namespaces().await.unwrap(), vec!["photos"]);

        let mut keys = store.list_keys("photos").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.jpg", "dir/b c.jpg"]);

        assert!(store.delete("photos", "a.jpg").await.unwrap());
        assert!(!store.delete("photos", "a.jpg").await.unwrap());
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(RiakMetadataStore::new("mailto:riak@example.com", Duration::from_secs(1)).is_err());
        assert!(RiakMetadataStore::new("not a url", Duration::from_secs(1)).is_err());
    }
}
