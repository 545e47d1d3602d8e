//! `FileService`: the operations exposed to the API layer and the CLI.

use bytes::Bytes;
use fv_core::config::FvConfig;
use fv_core::types::{
    CleanupReport, DeleteReceipt, DownloadedFile, FileSummary, FragmentLink, UploadReceipt,
    ValidationReport,
};
use fv_core::FvResult;
use fv_storage::BlobStore;
use std::sync::Arc;

use crate::download::DownloadPipeline;
use crate::maintenance::Maintenance;
use crate::metadata::MetadataStore;
use crate::upload::UploadPipeline;

/// Owner-scoped file operations over an injected blob store and record store.
///
/// The owner id is trusted as already authenticated.
pub struct FileService {
    upload: UploadPipeline,
    download: DownloadPipeline,
    maintenance: Maintenance,
}

impl FileService {
    /// Fails with a config error if `config` does not validate.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn MetadataStore>,
        config: &FvConfig,
    ) -> FvResult<Self> {
        config.validate()?;
        Ok(Self {
            upload: UploadPipeline::new(Arc::clone(&blobs), Arc::clone(&records), config),
            download: DownloadPipeline::new(Arc::clone(&blobs), Arc::clone(&records), config),
            maintenance: Maintenance::new(blobs, records, config),
        })
    }

    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        mime_type: &str,
        content: impl Into<Bytes>,
    ) -> FvResult<UploadReceipt> {
        let record = self
            .upload
            .upload(owner_id, filename, mime_type, content.into())
            .await?;
        Ok(record.receipt())
    }

    pub async fn download(&self, owner_id: &str, file_id: &str) -> FvResult<DownloadedFile> {
        self.download.download(owner_id, file_id).await
    }

    pub async fn fragment_links(
        &self,
        owner_id: &str,
        file_id: &str,
    ) -> FvResult<Vec<FragmentLink>> {
        self.download.fragment_links(owner_id, file_id).await
    }

    pub async fn list(&self, owner_id: &str) -> FvResult<Vec<FileSummary>> {
        self.maintenance.list(owner_id).await
    }

    pub async fn delete(&self, owner_id: &str, file_id: &str) -> FvResult<DeleteReceipt> {
        self.maintenance.delete(owner_id, file_id).await
    }

    pub async fn validate(&self, owner_id: &str) -> FvResult<ValidationReport> {
        self.maintenance.validate(owner_id).await
    }

    pub async fn cleanup(&self, owner_id: &str) -> FvResult<CleanupReport> {
        self.maintenance.cleanup(owner_id).await
    }
}
