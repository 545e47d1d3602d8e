//! File record persistence.
//!
//! Two backends implement [`MetadataStore`]:
//!   - **Memory**: a `HashMap` behind an async `RwLock`, for tests and the
//!     in-memory storage backend.
//!   - **JSON**: the whole record set in one file, rewritten atomically via
//!     temp+rename on every mutation. A failed write rolls the in-memory
//!     mirror back so the mutation is never observed.
//!
//! Records are written once with all fragments; nothing mutates a committed
//! record in place.

use anyhow::Context;
use async_trait::async_trait;
use fv_core::types::FileRecord;
use fv_core::{FvError, FvResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a committed record. Rejects duplicate ids and records whose
    /// commit marker is not set.
    async fn insert(&self, record: FileRecord) -> FvResult<()>;

    /// Look up a record by id, scoped to its owner.
    async fn find_one(&self, id: &str, owner_id: &str) -> FvResult<Option<FileRecord>>;

    /// Every record belonging to `owner_id`, in no particular order.
    async fn find_all(&self, owner_id: &str) -> FvResult<Vec<FileRecord>>;

    /// Remove a record. Returns whether it existed.
    async fn delete_one(&self, id: &str) -> FvResult<bool>;
}

fn check_insertable(records: &HashMap<String, FileRecord>, record: &FileRecord) -> FvResult<()> {
    if !record.is_complete {
        return Err(FvError::Metadata(format!(
            "refusing to insert uncommitted record {}",
            record.id
        )));
    }
    if records.contains_key(&record.id) {
        return Err(FvError::Metadata(format!("duplicate record id {}", record.id)));
    }
    Ok(())
}

fn owned_by(records: &HashMap<String, FileRecord>, owner_id: &str) -> Vec<FileRecord> {
    records
        .values()
        .filter(|r| r.owner_id == owner_id)
        .cloned()
        .collect()
}

/// Process-local record store
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<String, FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records as-is, damaged ones included.
    pub fn with_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: FileRecord) -> FvResult<()> {
        let mut records = self.records.write().await;
        check_insertable(&records, &record)?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_one(&self, id: &str, owner_id: &str) -> FvResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records.get(id).filter(|r| r.owner_id == owner_id).cloned())
    }

    async fn find_all(&self, owner_id: &str) -> FvResult<Vec<FileRecord>> {
        Ok(owned_by(&*self.records.read().await, owner_id))
    }

    async fn delete_one(&self, id: &str) -> FvResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

/// Record store persisted to a single JSON file
pub struct JsonMetadataStore {
    path: PathBuf,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl JsonMetadataStore {
    /// Load the store at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> FvResult<Self> {
        let records: Vec<FileRecord> = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading record store: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing record store: {}", path.display()))?
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), records = records.len(), "record store loaded");

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        })
    }

    /// Atomic write: serialize everything to a temp file, then rename over the store.
    async fn persist(&self, records: &HashMap<String, FileRecord>) -> FvResult<()> {
        let mut sorted: Vec<&FileRecord> = records.values().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_vec_pretty(&sorted)
            .map_err(|e| FvError::Metadata(format!("serializing records: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    FvError::Metadata(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| FvError::Metadata(format!("writing {}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            FvError::Metadata(format!("renaming into {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn insert(&self, record: FileRecord) -> FvResult<()> {
        let mut records = self.records.lock().await;
        check_insertable(&records, &record)?;

        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            records.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn find_one(&self, id: &str, owner_id: &str) -> FvResult<Option<FileRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(id).filter(|r| r.owner_id == owner_id).cloned())
    }

    async fn find_all(&self, owner_id: &str) -> FvResult<Vec<FileRecord>> {
        Ok(owned_by(&*self.records.lock().await, owner_id))
    }

    async fn delete_one(&self, id: &str) -> FvResult<bool> {
        let mut records = self.records.lock().await;
        let Some(removed) = records.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&records).await {
            records.insert(removed.id.clone(), removed);
            return Err(e);
        }
        Ok(true)
    }
}
