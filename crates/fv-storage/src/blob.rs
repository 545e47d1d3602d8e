//! Blob store seam used by the fragment pipelines.
//!
//! A handle is the object key the fragment was written under. Keys are
//! namespaced by owner and file id so concurrent uploads never collide.

use async_trait::async_trait;
use bytes::Bytes;
use fv_core::{FvError, FvResult};
use opendal::Operator;
use std::time::Duration;

/// Remote object storage for fragment ciphertext.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` and return the handle to fetch it by.
    async fn put(&self, key: &str, data: Bytes) -> FvResult<String>;

    /// Fetch the bytes stored under `handle`.
    async fn get(&self, handle: &str) -> FvResult<Bytes>;

    /// Remove `handle`. Removing an absent object succeeds.
    async fn delete(&self, handle: &str) -> FvResult<()>;

    async fn exists(&self, handle: &str) -> FvResult<bool>;

    /// Time-limited read URL, or `None` when the backend cannot presign.
    async fn signed_url(&self, handle: &str, ttl: Duration) -> FvResult<Option<String>>;
}

/// [`BlobStore`] over any OpenDAL operator.
#[derive(Clone)]
pub struct OpendalBlobStore {
    op: Operator,
}

impl OpendalBlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

fn store_error(action: &str, handle: &str, e: opendal::Error) -> FvError {
    FvError::BlobStore(format!("{action} {handle}: {e}"))
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> FvResult<String> {
        let len = data.len();
        self.op
            .write(key, data)
            .await
            .map_err(|e| store_error("writing", key, e))?;
        tracing::debug!(key, bytes = len, "blob stored");
        Ok(key.to_string())
    }

    async fn get(&self, handle: &str) -> FvResult<Bytes> {
        let buf = self
            .op
            .read(handle)
            .await
            .map_err(|e| store_error("reading", handle, e))?;
        Ok(buf.to_bytes())
    }

    async fn delete(&self, handle: &str) -> FvResult<()> {
        self.op
            .delete(handle)
            .await
            .map_err(|e| store_error("deleting", handle, e))
    }

    async fn exists(&self, handle: &str) -> FvResult<bool> {
        self.op
            .exists(handle)
            .await
            .map_err(|e| store_error("probing", handle, e))
    }

    async fn signed_url(&self, handle: &str, ttl: Duration) -> FvResult<Option<String>> {
        match self.op.presign_read(handle, ttl).await {
            Ok(req) => Ok(Some(req.uri().to_string())),
            Err(e) if e.kind() == opendal::ErrorKind::Unsupported => Ok(None),
            Err(e) => Err(store_error("presigning", handle, e)),
        }
    }
}

/// Object key for one fragment of an uploaded file:
/// `{root}/{owner_id}/{file_id}/{stem}_fragment{n}{ext}`.
///
/// Path separators and dot-only segments in caller-supplied parts are
/// replaced so a key can never escape its owner prefix.
pub fn fragment_object_key(
    root: &str,
    owner_id: &str,
    file_id: &str,
    original_name: &str,
    fragment_number: u32,
) -> String {
    let (stem, ext) = match original_name.rfind('.') {
        Some(idx) => original_name.split_at(idx),
        None => (original_name, ""),
    };
    let name = format!(
        "{}_fragment{fragment_number}{}",
        sanitize(stem),
        sanitize(ext)
    );

    let owner = segment(owner_id);
    let file = segment(file_id);
    [root.trim_matches('/'), owner.as_str(), file.as_str(), name.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn segment(part: &str) -> String {
    let clean = sanitize(part);
    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        clean
    }
}
