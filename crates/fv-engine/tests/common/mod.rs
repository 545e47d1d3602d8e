//! Shared fixtures: in-memory OpenDAL storage with injectable faults.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use fv_core::config::FvConfig;
use fv_core::types::FileRecord;
use fv_core::{FvError, FvResult};
use fv_engine::{FileService, MemoryMetadataStore, MetadataStore};
use fv_storage::{BlobStore, OpendalBlobStore};
use opendal::Operator;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OWNER: &str = "alice";
pub const OTHER_OWNER: &str = "bob";

pub fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

/// Default config with millisecond backoffs so retry tests stay fast.
pub fn test_config() -> FvConfig {
    let mut config = FvConfig::default();
    config.storage.backend = "memory".into();
    config.download.initial_backoff_ms = 1;
    config.download.max_backoff_ms = 5;
    config.download.attempt_timeout_secs = 5;
    config.download.download_timeout_secs = 30;
    config
}

/// Fragment number encoded in an object key (`..._fragment{n}.ext`).
pub fn fragment_of(key: &str) -> Option<u32> {
    let rest = &key[key.rfind("_fragment")? + "_fragment".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Default)]
struct Faults {
    fail_put: HashSet<u32>,
    hang_put: HashSet<u32>,
    /// fragment -> remaining failing gets
    fail_get: HashMap<u32, u32>,
    fail_delete: HashSet<u32>,
    hang_get: HashSet<u32>,
    /// fragments whose next delete never returns
    hang_delete_once: HashSet<u32>,
    fail_exists: bool,
}

/// Memory-backed blob store that fails selected fragments on demand.
pub struct FaultyBlobStore {
    inner: OpendalBlobStore,
    faults: Mutex<Faults>,
    attempted_puts: Mutex<Vec<String>>,
    gets: AtomicU32,
}

impl FaultyBlobStore {
    pub fn new() -> Self {
        Self {
            inner: OpendalBlobStore::new(memory_operator()),
            faults: Mutex::new(Faults::default()),
            attempted_puts: Mutex::new(Vec::new()),
            gets: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &OpendalBlobStore {
        &self.inner
    }

    pub fn fail_put(&self, fragment: u32) {
        self.faults.lock().unwrap().fail_put.insert(fragment);
    }

    pub fn hang_put(&self, fragment: u32) {
        self.faults.lock().unwrap().hang_put.insert(fragment);
    }

    /// Fail the next `times` gets of `fragment`.
    pub fn fail_get(&self, fragment: u32, times: u32) {
        self.faults.lock().unwrap().fail_get.insert(fragment, times);
    }

    pub fn hang_get(&self, fragment: u32) {
        self.faults.lock().unwrap().hang_get.insert(fragment);
    }

    pub fn hang_delete_once(&self, fragment: u32) {
        self.faults.lock().unwrap().hang_delete_once.insert(fragment);
    }

    pub fn fail_delete(&self, fragment: u32) {
        self.faults.lock().unwrap().fail_delete.insert(fragment);
    }

    pub fn fail_exists(&self, fail: bool) {
        self.faults.lock().unwrap().fail_exists = fail;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    pub fn attempted_puts(&self) -> Vec<String> {
        self.attempted_puts.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    /// How many of the attempted keys still hold an object.
    pub async fn surviving(&self, keys: &[String]) -> usize {
        let mut n = 0;
        for key in keys {
            if self.inner.exists(key).await.unwrap() {
                n += 1;
            }
        }
        n
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> FvResult<String> {
        self.attempted_puts.lock().unwrap().push(key.to_string());
        let fragment = fragment_of(key).unwrap_or(0);
        let (fail, hang) = {
            let faults = self.faults.lock().unwrap();
            (
                faults.fail_put.contains(&fragment),
                faults.hang_put.contains(&fragment),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(FvError::BlobStore(format!("injected put failure for {key}")));
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, handle: &str) -> FvResult<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let fragment = fragment_of(handle).unwrap_or(0);
        let (fail, hang) = {
            let mut faults = self.faults.lock().unwrap();
            let hang = faults.hang_get.contains(&fragment);
            let fail = match faults.fail_get.get_mut(&fragment) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (fail, hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(FvError::BlobStore(format!("injected get failure for {handle}")));
        }
        self.inner.get(handle).await
    }

    async fn delete(&self, handle: &str) -> FvResult<()> {
        let fragment = fragment_of(handle).unwrap_or(0);
        let hang = self.faults.lock().unwrap().hang_delete_once.remove(&fragment);
        if hang {
            std::future::pending::<()>().await;
        }
        if self.faults.lock().unwrap().fail_delete.contains(&fragment) {
            return Err(FvError::BlobStore(format!("injected delete failure for {handle}")));
        }
        self.inner.delete(handle).await
    }

    async fn exists(&self, handle: &str) -> FvResult<bool> {
        if self.faults.lock().unwrap().fail_exists {
            return Err(FvError::BlobStore("injected probe failure".into()));
        }
        self.inner.exists(handle).await
    }

    async fn signed_url(&self, handle: &str, ttl: Duration) -> FvResult<Option<String>> {
        self.inner.signed_url(handle, ttl).await
    }
}

/// Record store whose inserts always fail.
#[derive(Default)]
pub struct RejectingMetadataStore;

#[async_trait]
impl MetadataStore for RejectingMetadataStore {
    async fn insert(&self, _record: FileRecord) -> FvResult<()> {
        Err(FvError::Metadata("injected insert failure".into()))
    }

    async fn find_one(&self, _id: &str, _owner_id: &str) -> FvResult<Option<FileRecord>> {
        Ok(None)
    }

    async fn find_all(&self, _owner_id: &str) -> FvResult<Vec<FileRecord>> {
        Ok(Vec::new())
    }

    async fn delete_one(&self, _id: &str) -> FvResult<bool> {
        Ok(false)
    }
}

/// Memory record store whose `delete_one` fails for chosen ids.
#[derive(Default)]
pub struct StubbornMetadataStore {
    inner: MemoryMetadataStore,
    undeletable: Mutex<HashSet<String>>,
}

impl StubbornMetadataStore {
    pub fn with_records(records: Vec<FileRecord>) -> Self {
        Self {
            inner: MemoryMetadataStore::with_records(records),
            undeletable: Mutex::new(HashSet::new()),
        }
    }

    pub fn refuse_delete(&self, id: &str) {
        self.undeletable.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl MetadataStore for StubbornMetadataStore {
    async fn insert(&self, record: FileRecord) -> FvResult<()> {
        self.inner.insert(record).await
    }

    async fn find_one(&self, id: &str, owner_id: &str) -> FvResult<Option<FileRecord>> {
        self.inner.find_one(id, owner_id).await
    }

    async fn find_all(&self, owner_id: &str) -> FvResult<Vec<FileRecord>> {
        self.inner.find_all(owner_id).await
    }

    async fn delete_one(&self, id: &str) -> FvResult<bool> {
        if self.undeletable.lock().unwrap().contains(id) {
            return Err(FvError::Metadata(format!("injected delete failure for {id}")));
        }
        self.inner.delete_one(id).await
    }
}

pub struct Harness {
    pub service: FileService,
    pub blobs: Arc<FaultyBlobStore>,
    pub records: Arc<MemoryMetadataStore>,
    pub config: FvConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: FvConfig) -> Self {
        Self::assemble(Arc::new(FaultyBlobStore::new()), Arc::new(MemoryMetadataStore::new()), config)
    }

    fn assemble(
        blobs: Arc<FaultyBlobStore>,
        records: Arc<MemoryMetadataStore>,
        config: FvConfig,
    ) -> Self {
        let service = FileService::new(blobs.clone(), records.clone(), &config).expect("service");
        Self {
            service,
            blobs,
            records,
            config,
        }
    }

    /// A fresh service over the same blobs whose record store holds `records`
    /// verbatim, damaged ones included.
    pub fn with_records(&self, records: Vec<FileRecord>) -> Self {
        Self::assemble(
            self.blobs.clone(),
            Arc::new(MemoryMetadataStore::with_records(records)),
            self.config.clone(),
        )
    }

    pub async fn record(&self, file_id: &str) -> FileRecord {
        self.records
            .find_one(file_id, OWNER)
            .await
            .unwrap()
            .expect("record exists")
    }
}
