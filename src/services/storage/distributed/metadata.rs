//! Key-value metadata store contract.
//!
//! Values are opaque bytes to the store; the distributed backend keeps JSON
//! documents in them. Namespaces appear as soon as they hold one key and
//! disappear with their last key.

use crate::services::storage::StorageResult;
use async_trait::async_trait;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every namespace currently holding at least one key.
    async fn list_namespaces(&self) -> StorageResult<Vec<String>>;

    /// Keys of one namespace. Implementations may return them unordered.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Insert or replace.
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Remove a key, returning whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    async fn ping(&self) -> StorageResult<()>;
}
