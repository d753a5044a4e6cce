//! In-memory metadata and blob stores for exercising the distributed
//! backend without external services.

use super::{blob::BlobStore, metadata::MetadataStore};
use crate::{
    models::object::BlobLocation,
    services::storage::{StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryMetadataStore {
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_namespaces(&self) -> StorageResult<Vec<String>> {
        Ok(self.namespaces.read().await.keys().cloned().collect())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        // Reverse order: callers must not rely on the store sorting keys.
        Ok(namespaces
            .get(namespace)
            .map(|keys| keys.keys().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let mut namespaces = self.namespaces.write().await;
        let Some(keys) = namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        let existed = keys.remove(key).is_some();
        if keys.is_empty() {
            namespaces.remove(namespace);
        }
        Ok(existed)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Blob store recording every delete it is asked to perform. Deletes can
/// be made to fail to simulate an unreachable service.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobLocation, Bytes>>,
    next: AtomicUsize,
    fail_deletes: AtomicBool,
    delete_requests: Mutex<Vec<BlobLocation>>,
}

impl MemoryBlobStore {
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn delete_requests(&self) -> Vec<BlobLocation> {
        self.delete_requests.lock().unwrap().clone()
    }

    pub async fn contains(&self, location: &BlobLocation) -> bool {
        self.blobs.read().await.contains_key(location)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, payload: Bytes) -> StorageResult<BlobLocation> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let location = BlobLocation(format!("luwak/blob{}", id));
        self.blobs.write().await.insert(location.clone(), payload);
        Ok(location)
    }

    async fn fetch(&self, location: &BlobLocation) -> StorageResult<Bytes> {
        self.blobs
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::MissingBlob(location.clone()))
    }

    async fn delete(&self, location: &BlobLocation) -> StorageResult<()> {
        self.delete_requests.lock().unwrap().push(location.clone());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout(format!("delete {}", location)));
        }
        self.blobs.write().await.remove(location);
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
