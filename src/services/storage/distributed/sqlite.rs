//! SQLite-backed metadata store (single node deployments and tests).

use super::metadata::MetadataStore;
use crate::services::storage::StorageResult;
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info};

/// Schema, applied idempotently on every connect.
const MIGRATION: &str = include_str!("../../../../migrations/0001_init.sql");

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Connect to `url` (e.g. `sqlite://./data/meta/otto.db`), creating the
    /// database file and its parent directory when missing.
    pub async fn connect(url: &str, timeout: Duration) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        info!("Metadata store ready at {}", url);
        Ok(store)
    }

    /// A private in-memory database. A single connection keeps every query
    /// on the same database.
    #[cfg(test)]
    pub async fn in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn list_namespaces(&self) -> StorageResult<Vec<String>> {
        let namespaces =
            sqlx::query_scalar::<_, String>("SELECT DISTINCT namespace FROM kv ORDER BY namespace")
                .fetch_all(&self.pool)
                .await?;
        Ok(namespaces)
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let keys =
            sqlx::query_scalar::<_, String>("SELECT key FROM kv WHERE namespace = ? ORDER BY key")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM kv WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO kv (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
