use crate::services::storage::fs::MAX_BUCKET_DEPTH;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Storage implementations selectable at startup.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Buckets are directories, objects are files.
    Fs,
    /// Metadata in a key-value store, payloads in a blob service.
    Distributed,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub bucket_depth: usize,
    pub metadata_url: String,
    pub blob_url: String,
    pub backend_timeout_secs: u64,
    pub max_object_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "S3-compatible object store")]
pub struct Args {
    /// Host to bind to (overrides OTTO_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OTTO_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides OTTO_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Root directory of the fs backend (overrides OTTO_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Hash-shard directory levels per bucket (overrides OTTO_BUCKET_DEPTH)
    #[arg(long)]
    pub bucket_depth: Option<usize>,

    /// sqlite: or http(s):// metadata store (overrides OTTO_METADATA_URL)
    #[arg(long)]
    pub metadata_url: Option<String>,

    /// Blob service base URL (overrides OTTO_BLOB_URL)
    #[arg(long)]
    pub blob_url: Option<String>,

    /// Timeout for metadata/blob calls (overrides OTTO_BACKEND_TIMEOUT_SECS)
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Largest accepted upload (overrides OTTO_MAX_OBJECT_BYTES)
    #[arg(long)]
    pub max_object_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name))
    }

    /// Merge `args` over variables from `lookup` over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        let cfg = Self {
            host: match args.host {
                Some(host) => host,
                None => text("OTTO_HOST", "0.0.0.0")?,
            },
            port: match args.port {
                Some(port) => port,
                None => parse_var("OTTO_PORT", &text("OTTO_PORT", "8888")?)?,
            },
            backend: match args.backend {
                Some(backend) => backend,
                None => {
                    let value = text("OTTO_BACKEND", "fs")?;
                    <BackendKind as ValueEnum>::from_str(&value, true).map_err(|_| {
                        anyhow::anyhow!(
                            "parsing OTTO_BACKEND value `{}` (expected fs or distributed)",
                            value
                        )
                    })?
                }
            },
            storage_dir: match args.storage_dir {
                Some(dir) => dir,
                None => text("OTTO_STORAGE_DIR", "./data/s3")?,
            },
            bucket_depth: match args.bucket_depth {
                Some(depth) => depth,
                None => parse_var("OTTO_BUCKET_DEPTH", &text("OTTO_BUCKET_DEPTH", "0")?)?,
            },
            metadata_url: match args.metadata_url {
                Some(url) => url,
                None => text("OTTO_METADATA_URL", "sqlite://./data/meta/otto.db")?,
            },
            blob_url: match args.blob_url {
                Some(url) => url,
                None => text("OTTO_BLOB_URL", "http://127.0.0.1:8098")?,
            },
            backend_timeout_secs: match args.backend_timeout_secs {
                Some(secs) => secs,
                None => parse_var(
                    "OTTO_BACKEND_TIMEOUT_SECS",
                    &text("OTTO_BACKEND_TIMEOUT_SECS", "30")?,
                )?,
            },
            max_object_bytes: match args.max_object_bytes {
                Some(bytes) => bytes,
                None => parse_var(
                    "OTTO_MAX_OBJECT_BYTES",
                    &text("OTTO_MAX_OBJECT_BYTES", "67108864")?,
                )?,
            },
        };

        if cfg.bucket_depth > MAX_BUCKET_DEPTH {
            bail!(
                "bucket depth {} exceeds the maximum of {}",
                cfg.bucket_depth,
                MAX_BUCKET_DEPTH
            );
        }
        if cfg.backend_timeout_secs == 0 {
            bail!("backend timeout must be at least one second");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parsing {} value `{}`", name, value))
}
