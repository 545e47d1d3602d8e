//! OpenDAL Operator factory for fragvault storage backends

use anyhow::{Context, Result};
use fv_core::config::StorageConfig;
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

/// S3 access credentials. The secret never appears in `Debug` output.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
        }
    }
}

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub credentials: S3Credentials,
}

/// Build an OpenDAL Operator for S3 (or any S3-compatible endpoint such as MinIO)
///
/// Path-style addressing is the opendal default, which MinIO requires.
pub fn build_operator(cfg: &S3Settings) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.credentials.access_key_id)
        .secret_access_key(cfg.credentials.secret_access_key.expose_secret());

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build a local-filesystem operator rooted at `root`.
pub fn build_fs_operator(root: &Path) -> Result<Operator> {
    let root = root
        .to_str()
        .with_context(|| format!("fs root is not valid UTF-8: {}", root.display()))?;
    let op = Operator::new(opendal::services::Fs::default().root(root))
        .context("creating OpenDAL fs operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Build a process-local in-memory operator. Contents vanish on exit.
pub fn build_memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// Build the operator selected by `storage.backend`.
///
/// S3 requires credentials. If `enforce_tls` is true and the S3 endpoint uses
/// HTTP, this returns an error; otherwise a warning is logged.
pub fn build_from_config(
    storage: &StorageConfig,
    credentials: Option<&S3Credentials>,
) -> Result<Operator> {
    match storage.backend.as_str() {
        "s3" => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP; credentials and fragments travel unencrypted"
                );
            }

            let credentials = credentials.context(
                "S3 credentials not set (AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or \
                 FV_ACCESS_KEY_ID/FV_SECRET_ACCESS_KEY)",
            )?;

            build_operator(&S3Settings {
                endpoint: storage.endpoint.clone(),
                region: storage.region.clone(),
                bucket: storage.bucket.clone(),
                credentials: credentials.clone(),
            })
        }
        "fs" => build_fs_operator(&storage.fs_root),
        "memory" => {
            tracing::warn!("memory storage backend selected; fragments are not persisted");
            build_memory_operator()
        }
        other => anyhow::bail!("unknown storage backend {other:?} (expected s3, fs or memory)"),
    }
}
