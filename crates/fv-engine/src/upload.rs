//! Upload pipeline: split, encrypt per fragment, store, commit.
//!
//! ```text
//! validate -> split(n) -> [keygen -> AES-256-GCM -> put]  x n (bounded)
//!          -> sort by fragment number -> insert record (is_complete = true)
//! ```
//!
//! Nothing is visible to readers until the single record insert succeeds.
//! Every object key is registered before its put starts, so a failure, a
//! timeout or a dropped future removes every blob this upload may have written.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use fv_core::config::{FragmentConfig, FvConfig};
use fv_core::types::{FileRecord, FragmentRecord, DEFAULT_MIME_TYPE};
use fv_core::{FvError, FvResult};
use fv_crypto::{encrypt, generate_key};
use fv_storage::{fragment_object_key, BlobStore};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::maintenance::purge_blobs;
use crate::metadata::MetadataStore;

/// Object keys an in-progress upload may have written.
#[derive(Clone, Default)]
struct KeyLedger(Arc<Mutex<Vec<String>>>);

impl KeyLedger {
    fn register(&self, key: String) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(key);
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Deletes registered blobs unless disarmed. If the upload future is dropped
/// mid-flight the deletion is spawned onto the current runtime.
struct RollbackGuard {
    blobs: Arc<dyn BlobStore>,
    ledger: KeyLedger,
    file_id: String,
    concurrency: usize,
    armed: bool,
}

impl RollbackGuard {
    fn new(blobs: Arc<dyn BlobStore>, file_id: &str, concurrency: usize) -> Self {
        Self {
            blobs,
            ledger: KeyLedger::default(),
            file_id: file_id.to_string(),
            concurrency,
            armed: true,
        }
    }

    /// Purge every registered key. The guard stays armed until the purge
    /// finishes, so cancelling mid-rollback hands the keys to `Drop`.
    async fn rollback(&mut self) {
        let keys = self.ledger.snapshot();
        if keys.is_empty() {
            self.armed = false;
            return;
        }
        let total = keys.len();
        let failures = purge_blobs(self.blobs.as_ref(), keys, self.concurrency).await;
        self.ledger.take();
        self.armed = false;
        warn!(
            file_id = %self.file_id,
            blobs = total,
            leaked = failures.len(),
            "upload rolled back"
        );
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let keys = self.ledger.take();
        if keys.is_empty() {
            return;
        }

        let file_id = std::mem::take(&mut self.file_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let blobs = Arc::clone(&self.blobs);
                let concurrency = self.concurrency;
                handle.spawn(async move {
                    let total = keys.len();
                    let failures = purge_blobs(blobs.as_ref(), keys, concurrency).await;
                    warn!(%file_id, blobs = total, leaked = failures.len(), "cancelled upload rolled back");
                });
            }
            Err(_) => {
                warn!(%file_id, blobs = keys.len(), "no runtime to roll back cancelled upload; blobs leaked");
            }
        }
    }
}

pub struct UploadPipeline {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn MetadataStore>,
    root: String,
    fragments: FragmentConfig,
    cleanup_concurrency: usize,
}

impl UploadPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn MetadataStore>,
        config: &FvConfig,
    ) -> Self {
        Self {
            blobs,
            records,
            root: config.storage.root.clone(),
            fragments: config.fragments.clone(),
            cleanup_concurrency: config.maintenance.cleanup_concurrency,
        }
    }

    /// Fragment, encrypt and store `content`, then commit its record.
    ///
    /// All-or-nothing: on any failure the blobs already written are deleted
    /// (best-effort) and no record exists.
    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        mime_type: &str,
        content: Bytes,
    ) -> FvResult<FileRecord> {
        self.check_request(owner_id, filename, &content)?;
        let mime_type = match mime_type.trim() {
            "" => DEFAULT_MIME_TYPE.to_string(),
            m => m.to_string(),
        };

        let file_id = uuid::Uuid::new_v4().to_string();
        let mut guard = RollbackGuard::new(Arc::clone(&self.blobs), &file_id, self.cleanup_concurrency);

        let deadline = Duration::from_secs(self.fragments.upload_timeout_secs);
        let stored = tokio::time::timeout(
            deadline,
            self.store_fragments(&guard.ledger, owner_id, &file_id, filename, &content),
        )
        .await;

        let mut fragments = match stored {
            Ok(Ok(fragments)) => fragments,
            Ok(Err(e)) => {
                warn!(%file_id, owner = %owner_id, error = %e, "upload failed");
                guard.rollback().await;
                return Err(e);
            }
            Err(_) => {
                warn!(%file_id, owner = %owner_id, timeout_secs = deadline.as_secs(), "upload timed out");
                guard.rollback().await;
                return Err(FvError::Timeout(format!(
                    "upload of {filename} exceeded {}s",
                    deadline.as_secs()
                )));
            }
        };
        fragments.sort_by_key(|f| f.fragment_number);

        let record = FileRecord {
            id: file_id.clone(),
            owner_id: owner_id.to_string(),
            original_name: filename.to_string(),
            mime_type,
            size: content.len() as u64,
            fragment_count: self.fragments.count,
            fragments,
            is_complete: true,
            upload_date: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        if let Err(e) = self.records.insert(record.clone()).await {
            warn!(%file_id, owner = %owner_id, error = %e, "record commit failed");
            guard.rollback().await;
            return Err(e);
        }
        guard.disarm();

        info!(
            %file_id,
            owner = %owner_id,
            name = %filename,
            bytes = record.size,
            fragments = record.fragment_count,
            "uploaded"
        );
        Ok(record)
    }

    fn check_request(&self, owner_id: &str, filename: &str, content: &[u8]) -> FvResult<()> {
        if owner_id.trim().is_empty() {
            return Err(FvError::InvalidInput("owner id is required".into()));
        }
        if content.is_empty() {
            return Err(FvError::InvalidInput("no file content provided".into()));
        }
        if content.len() as u64 > self.fragments.max_file_size {
            return Err(FvError::InvalidInput(format!(
                "file is {} bytes, limit is {}",
                content.len(),
                self.fragments.max_file_size
            )));
        }
        if filename.trim().is_empty() {
            return Err(FvError::InvalidInput("filename is required".into()));
        }
        if !filename.contains('.') {
            return Err(FvError::InvalidInput(format!(
                "filename {filename:?} has no extension"
            )));
        }
        Ok(())
    }

    async fn store_fragments(
        &self,
        ledger: &KeyLedger,
        owner_id: &str,
        file_id: &str,
        filename: &str,
        content: &Bytes,
    ) -> FvResult<Vec<FragmentRecord>> {
        // owned (number, key, bytes) so the stream closure borrows nothing per item
        let pieces: Vec<(u32, String, Bytes)> =
            fv_fragments::split(content, self.fragments.count as usize)?
                .into_iter()
                .enumerate()
                .map(|(i, piece)| {
                    let n = i as u32 + 1;
                    let key = fragment_object_key(&self.root, owner_id, file_id, filename, n);
                    (n, key, content.slice_ref(piece))
                })
                .collect();

        stream::iter(pieces)
            .map(|(n, key, plaintext)| self.store_fragment(ledger, file_id, n, key, plaintext))
            .buffer_unordered(self.fragments.upload_concurrency.max(1))
            .try_collect()
            .await
    }

    async fn store_fragment(
        &self,
        ledger: &KeyLedger,
        file_id: &str,
        n: u32,
        key: String,
        plaintext: Bytes,
    ) -> FvResult<FragmentRecord> {
        let (fragment_key, sealed) = tokio::task::spawn_blocking(move || {
            let fragment_key = generate_key();
            encrypt(&plaintext, &fragment_key).map(|sealed| (fragment_key, sealed))
        })
        .await
        .map_err(|e| FvError::Encryption(format!("fragment {n} encryption task failed: {e}")))??;

        ledger.register(key.clone());
        let len = sealed.ciphertext.len();
        let handle = self
            .blobs
            .put(&key, Bytes::from(sealed.ciphertext))
            .await
            .inspect_err(|e| warn!(%file_id, fragment = n, error = %e, "fragment store failed"))?;
        if handle != key {
            ledger.register(handle.clone());
        }
        debug!(%file_id, fragment = n, bytes = len, "fragment stored");

        Ok(FragmentRecord {
            fragment_number: n,
            blob_handle: handle,
            encryption_key: fragment_key.to_base64(),
            iv: sealed.iv.to_base64(),
            auth_tag: sealed.tag.to_base64(),
        })
    }
}
