use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FvError, FvResult};

/// Top-level configuration (loaded from fragvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FvConfig {
    pub storage: StorageConfig,
    pub fragments: FragmentConfig,
    pub download: DownloadConfig,
    pub maintenance: MaintenanceConfig,
    pub metadata: MetadataConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "s3", "fs" or "memory"
    pub backend: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix under which all fragments are stored
    pub root: String,
    /// Directory used by the "fs" backend
    pub fs_root: PathBuf,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Lifetime of presigned fragment URLs
    pub signed_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Number of fragments every file is split into
    pub count: u32,
    /// Upload size cap in bytes (default: 100 MiB)
    pub max_file_size: u64,
    /// Fragments encrypted and stored in parallel
    pub upload_concurrency: usize,
    /// Deadline for encrypting and storing every fragment
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Fetch+decrypt attempts per fragment
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Deadline for a single fetch+decrypt attempt
    pub attempt_timeout_secs: u64,
    /// Deadline for the whole download
    pub download_timeout_secs: u64,
    /// Fragments fetched in parallel
    pub fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Parallel blob deletions/probes during delete, validate and cleanup
    pub cleanup_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// JSON record store path
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "s3".into(),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "fragvault".into(),
            root: "encrypted_files".into(),
            fs_root: PathBuf::from("~/.local/share/fragvault/blobs"),
            enforce_tls: false,
            signed_url_ttl_secs: 900,
        }
    }
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            count: 5,
            max_file_size: 100 * 1024 * 1024,
            upload_concurrency: 5,
            upload_timeout_secs: 300,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
            attempt_timeout_secs: 30,
            download_timeout_secs: 300,
            fetch_concurrency: 5,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_concurrency: 8,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/fragvault/records.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl DownloadConfig {
    /// Backoff slept before retry number `retry` (1-based): doubles from the
    /// initial value and saturates at the ceiling.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Worst-case wall time one fragment can spend in its retry loop, or
    /// `None` if it does not fit in a `Duration`.
    pub fn max_fragment_window(&self) -> Option<Duration> {
        let mut window =
            Duration::from_secs(self.attempt_timeout_secs).checked_mul(self.max_attempts)?;
        let ceiling = Duration::from_millis(self.max_backoff_ms);
        for retry in 1..self.max_attempts {
            let backoff = self.backoff_for(retry);
            if backoff.is_zero() || backoff >= ceiling {
                // every remaining backoff is the same
                let remaining = self.max_attempts - retry;
                return window.checked_add(backoff.checked_mul(remaining)?);
            }
            window = window.checked_add(backoff)?;
        }
        Some(window)
    }
}

impl FvConfig {
    pub fn from_toml(s: &str) -> FvResult<Self> {
        toml::from_str(s).map_err(|e| FvError::Config(format!("parsing config: {e}")))
    }

    /// Reject configurations the pipelines cannot honour.
    pub fn validate(&self) -> FvResult<()> {
        if self.fragments.count == 0 {
            return Err(FvError::Config("fragments.count must be positive".into()));
        }
        if self.fragments.max_file_size == 0 {
            return Err(FvError::Config("fragments.max_file_size must be positive".into()));
        }
        if self.fragments.upload_concurrency == 0
            || self.download.fetch_concurrency == 0
            || self.maintenance.cleanup_concurrency == 0
        {
            return Err(FvError::Config("concurrency limits must be positive".into()));
        }
        if self.download.max_attempts == 0 {
            return Err(FvError::Config("download.max_attempts must be at least 1".into()));
        }
        if self.download.initial_backoff_ms > self.download.max_backoff_ms {
            return Err(FvError::Config(format!(
                "download.initial_backoff_ms ({}) exceeds download.max_backoff_ms ({})",
                self.download.initial_backoff_ms, self.download.max_backoff_ms
            )));
        }
        if self.download.attempt_timeout_secs == 0 || self.download.download_timeout_secs == 0 {
            return Err(FvError::Config("download timeouts must be positive".into()));
        }

        // A presigned URL must outlive every retry of the fragment it serves.
        let window = self.download.max_fragment_window().ok_or_else(|| {
            FvError::Config(
                "download retry window overflows; lower attempt_timeout_secs or max_attempts"
                    .into(),
            )
        })?;
        if Duration::from_secs(self.storage.signed_url_ttl_secs) <= window {
            return Err(FvError::Config(format!(
                "storage.signed_url_ttl_secs ({}) must exceed the fragment retry window ({}s)",
                self.storage.signed_url_ttl_secs,
                window.as_secs()
            )));
        }

        match self.storage.backend.as_str() {
            "s3" | "fs" | "memory" => Ok(()),
            other => Err(FvError::Config(format!(
                "unknown storage.backend {other:?} (expected s3, fs or memory)"
            ))),
        }
    }
}
