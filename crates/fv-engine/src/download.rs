//! Download pipeline: look up, fetch + decrypt each fragment with retries,
//! reassemble in fragment order, verify length.

use futures::stream::{self, StreamExt};
use fv_core::config::{DownloadConfig, FvConfig};
use fv_core::types::{DownloadedFile, FileRecord, FragmentLink};
use fv_core::{FragmentFailure, FvError, FvResult};
use fv_crypto::{decrypt, AuthTag, FragmentKey, Iv};
use fv_fragments::reassemble;
use fv_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::metadata::MetadataStore;
use crate::retry::RetryPolicy;

/// A fragment whose secrets decoded to the right lengths.
struct Unsealed {
    number: u32,
    handle: String,
    key: FragmentKey,
    iv: Iv,
    tag: AuthTag,
}

pub struct DownloadPipeline {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn MetadataStore>,
    config: DownloadConfig,
    policy: RetryPolicy,
    link_ttl: Duration,
}

impl DownloadPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn MetadataStore>,
        config: &FvConfig,
    ) -> Self {
        Self {
            blobs,
            records,
            config: config.download.clone(),
            policy: RetryPolicy::new(&config.download),
            link_ttl: Duration::from_secs(config.storage.signed_url_ttl_secs),
        }
    }

    /// Reconstruct the plaintext of `file_id` for `owner_id`.
    pub async fn download(&self, owner_id: &str, file_id: &str) -> FvResult<DownloadedFile> {
        let record = self
            .records
            .find_one(file_id, owner_id)
            .await?
            .ok_or_else(|| FvError::NotFound(format!("file {file_id}")))?;

        if !record.is_complete {
            return Err(FvError::IncompleteFile(format!(
                "file {file_id} was never committed"
            )));
        }

        let issues = record.fragment_issues();
        if !issues.is_empty() {
            return Err(FvError::CorruptFile {
                file_id: record.id,
                issues,
            });
        }

        let fragments = unseal(&record)?;

        let deadline = Duration::from_secs(self.config.download_timeout_secs);
        let content = tokio::time::timeout(deadline, self.fetch_all(&record.id, fragments))
            .await
            .map_err(|_| {
                FvError::Timeout(format!(
                    "download of {file_id} exceeded {}s",
                    deadline.as_secs()
                ))
            })??;

        if content.len() as u64 != record.size {
            return Err(FvError::Integrity {
                file_id: record.id,
                expected: record.size,
                actual: content.len() as u64,
            });
        }

        info!(
            file_id = %record.id,
            owner = %owner_id,
            bytes = content.len(),
            fragments = record.fragment_count,
            "downloaded"
        );

        Ok(DownloadedFile {
            mime_type: record.mime_type,
            original_name: record.original_name,
            content,
        })
    }

    /// Presigned read URLs for each fragment of a committed file, in
    /// fragment order. The TTL outlives a full per-fragment retry window.
    pub async fn fragment_links(
        &self,
        owner_id: &str,
        file_id: &str,
    ) -> FvResult<Vec<FragmentLink>> {
        let record = self
            .records
            .find_one(file_id, owner_id)
            .await?
            .filter(|r| r.is_complete)
            .ok_or_else(|| FvError::NotFound(format!("file {file_id}")))?;

        let mut links = Vec::with_capacity(record.fragments.len());
        for fragment in record.sorted_fragments() {
            let url = self
                .blobs
                .signed_url(&fragment.blob_handle, self.link_ttl)
                .await?;
            links.push(FragmentLink {
                fragment_number: fragment.fragment_number,
                url,
            });
        }
        Ok(links)
    }

    async fn fetch_all(&self, file_id: &str, fragments: Vec<Unsealed>) -> FvResult<Vec<u8>> {
        let results: Vec<Result<(u32, Vec<u8>), FragmentFailure>> = stream::iter(fragments)
            .map(|fragment| self.fetch_fragment(fragment))
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut parts = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(part) => parts.push(part),
                Err(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.fragment_number);
            return Err(FvError::FragmentsFailed {
                file_id: file_id.to_string(),
                failures,
            });
        }

        // completion order is arbitrary
        parts.sort_by_key(|(n, _)| *n);
        let ordered: Vec<Vec<u8>> = parts.into_iter().map(|(_, data)| data).collect();
        Ok(reassemble(&ordered))
    }

    async fn fetch_fragment(&self, fragment: Unsealed) -> Result<(u32, Vec<u8>), FragmentFailure> {
        let Unsealed {
            number,
            handle,
            key,
            iv,
            tag,
        } = fragment;
        let blobs = self.blobs.as_ref();
        let handle = handle.as_str();

        let plaintext = self
            .policy
            .run(number, move |_attempt| {
                let key = key.clone();
                async move {
                    let ciphertext = blobs.get(handle).await?;
                    tokio::task::spawn_blocking(move || decrypt(&ciphertext, &key, &iv, &tag))
                        .await
                        .map_err(|e| {
                            FvError::Decryption(format!("fragment {number} decrypt task failed: {e}"))
                        })?
                }
            })
            .await?;

        Ok((number, plaintext))
    }
}

/// Decode every fragment's key, nonce and tag. Malformed secrets cannot be
/// fixed by retrying, so they are reported together as corruption up front.
fn unseal(record: &FileRecord) -> FvResult<Vec<Unsealed>> {
    let mut unsealed = Vec::with_capacity(record.fragments.len());
    let mut issues = Vec::new();

    for fragment in record.sorted_fragments() {
        let n = fragment.fragment_number;
        let key = FragmentKey::from_base64(&fragment.encryption_key);
        let iv = Iv::from_base64(&fragment.iv);
        let tag = AuthTag::from_base64(&fragment.auth_tag);

        match (key, iv, tag) {
            (Ok(key), Ok(iv), Ok(tag)) => unsealed.push(Unsealed {
                number: n,
                handle: fragment.blob_handle.clone(),
                key,
                iv,
                tag,
            }),
            (key, iv, tag) => {
                for err in [key.err(), iv.err(), tag.err()].into_iter().flatten() {
                    issues.push(format!("fragment {n}: {err}"));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(unsealed)
    } else {
        Err(FvError::CorruptFile {
            file_id: record.id.clone(),
            issues,
        })
    }
}
