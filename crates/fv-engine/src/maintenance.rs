//! Delete, list, validate and cleanup of stored files.

use futures::stream::{self, StreamExt, TryStreamExt};
use fv_core::config::FvConfig;
use fv_core::types::{
    CleanedFile, CleanupFailure, CleanupReport, CorruptedFile, DeleteReceipt, FileRecord,
    FileSummary, ValidationReport,
};
use fv_core::{FvError, FvResult};
use fv_storage::BlobStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::metadata::MetadataStore;

/// Delete every handle with at most `concurrency` deletions in flight.
///
/// Failures are logged and returned as `"handle: error"` lines, sorted; they
/// never stop the remaining deletions.
pub(crate) async fn purge_blobs(
    blobs: &dyn BlobStore,
    handles: Vec<String>,
    concurrency: usize,
) -> Vec<String> {
    let mut failures: Vec<String> = stream::iter(handles)
        .map(|handle| async move {
            let result = blobs.delete(&handle).await;
            (handle, result)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(handle, result)| async move {
            match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(blob = %handle, error = %e, "blob delete failed");
                    Some(format!("{handle}: {e}"))
                }
            }
        })
        .collect()
        .await;
    failures.sort();
    failures
}

fn blob_handles(record: &FileRecord) -> Vec<String> {
    record
        .fragments
        .iter()
        .filter(|f| !f.blob_handle.is_empty())
        .map(|f| f.blob_handle.clone())
        .collect()
}

pub struct Maintenance {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn MetadataStore>,
    concurrency: usize,
}

impl Maintenance {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn MetadataStore>,
        config: &FvConfig,
    ) -> Self {
        Self {
            blobs,
            records,
            concurrency: config.maintenance.cleanup_concurrency,
        }
    }

    /// Remove a file's fragment blobs and then its record.
    ///
    /// Blob failures are logged and left behind; the record is removed anyway
    /// so the file disappears for its owner.
    pub async fn delete(&self, owner_id: &str, file_id: &str) -> FvResult<DeleteReceipt> {
        let record = self
            .records
            .find_one(file_id, owner_id)
            .await?
            .ok_or_else(|| FvError::NotFound(format!("file {file_id}")))?;

        let handles = blob_handles(&record);
        let total = handles.len();
        let failures = purge_blobs(self.blobs.as_ref(), handles, self.concurrency).await;

        if !self.records.delete_one(&record.id).await? {
            return Err(FvError::NotFound(format!("file {file_id}")));
        }

        info!(
            file_id = %record.id,
            owner = %owner_id,
            blobs = total,
            blob_failures = failures.len(),
            "deleted"
        );

        Ok(DeleteReceipt {
            file_id: record.id,
            original_name: record.original_name,
        })
    }

    /// Committed files of `owner_id`, newest first.
    pub async fn list(&self, owner_id: &str) -> FvResult<Vec<FileSummary>> {
        let mut records: Vec<FileRecord> = self
            .records
            .find_all(owner_id)
            .await?
            .into_iter()
            .filter(|r| r.is_complete)
            .collect();
        records.sort_by(|a, b| b.upload_date.cmp(&a.upload_date).then_with(|| a.id.cmp(&b.id)));
        Ok(records.iter().map(FileRecord::summary).collect())
    }

    /// Check every record of `owner_id` for structural damage and missing blobs.
    pub async fn validate(&self, owner_id: &str) -> FvResult<ValidationReport> {
        let mut report = ValidationReport::default();
        for (record, issues) in self.inspect(owner_id).await? {
            if issues.is_empty() {
                report.valid_files.push(record.summary());
            } else {
                report.corrupted_files.push(CorruptedFile {
                    file_id: record.id,
                    original_name: record.original_name,
                    issues,
                });
            }
        }

        info!(
            owner = %owner_id,
            valid = report.valid_files.len(),
            corrupted = report.corrupted_files.len(),
            "validated"
        );
        Ok(report)
    }

    /// Validate, then delete every corrupted record and whatever blobs it still has.
    ///
    /// A record that cannot be removed is reported in `failed_files` and the
    /// sweep carries on with the rest.
    pub async fn cleanup(&self, owner_id: &str) -> FvResult<CleanupReport> {
        let mut report = CleanupReport::default();
        for (record, issues) in self.inspect(owner_id).await? {
            if issues.is_empty() {
                continue;
            }

            let blob_failures =
                purge_blobs(self.blobs.as_ref(), blob_handles(&record), self.concurrency).await;
            let removed = match self.records.delete_one(&record.id).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(file_id = %record.id, owner = %owner_id, error = %e, "record delete failed");
                    report.failed_files.push(CleanupFailure {
                        file_id: record.id,
                        original_name: record.original_name,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            warn!(
                file_id = %record.id,
                owner = %owner_id,
                issues = issues.len(),
                removed,
                "corrupted file cleaned up"
            );

            report.deleted_files.push(CleanedFile {
                file_id: record.id,
                original_name: record.original_name,
                issues,
                blob_failures,
            });
        }
        Ok(report)
    }

    /// Every record of the owner paired with its issues, ordered by id.
    async fn inspect(&self, owner_id: &str) -> FvResult<Vec<(FileRecord, Vec<String>)>> {
        let mut records = self.records.find_all(owner_id).await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut inspected = Vec::with_capacity(records.len());
        for record in records {
            let mut issues = Vec::new();
            if !record.is_complete {
                issues.push("upload never completed".to_string());
            }
            issues.extend(record.fragment_issues());
            issues.extend(self.missing_blobs(&record).await?);
            inspected.push((record, issues));
        }
        Ok(inspected)
    }

    /// Probe each fragment blob. A probe error aborts: an unreachable store
    /// says nothing about whether the file is damaged.
    async fn missing_blobs(&self, record: &FileRecord) -> FvResult<Vec<String>> {
        let blobs = self.blobs.as_ref();
        let probes: Vec<(u32, String)> = record
            .sorted_fragments()
            .into_iter()
            .filter(|f| !f.blob_handle.is_empty())
            .map(|f| (f.fragment_number, f.blob_handle.clone()))
            .collect();

        let mut missing: Vec<u32> = stream::iter(probes)
            .map(|(n, handle)| async move {
                let exists = blobs.exists(&handle).await?;
                Ok::<_, FvError>((n, exists))
            })
            .buffer_unordered(self.concurrency.max(1))
            .try_filter_map(|(n, exists)| async move { Ok((!exists).then_some(n)) })
            .try_collect()
            .await?;
        missing.sort_unstable();
        Ok(missing
            .into_iter()
            .map(|n| format!("fragment {n}: blob missing"))
            .collect())
    }
}
