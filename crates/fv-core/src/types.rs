use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default content type for uploads that do not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// One encrypted fragment of a stored file.
///
/// Secrets are stored base64-encoded. A field absent from a stored record
/// deserializes as an empty string and is reported as missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentRecord {
    /// 1-based position used for reassembly
    #[serde(default)]
    pub fragment_number: u32,
    /// Object key in the blob store
    #[serde(default)]
    pub blob_handle: String,
    /// Per-fragment AES-256 key
    #[serde(default)]
    pub encryption_key: String,
    /// Per-fragment 96-bit GCM nonce
    #[serde(default)]
    pub iv: String,
    /// 128-bit GCM authentication tag
    #[serde(default)]
    pub auth_tag: String,
}

impl FragmentRecord {
    /// Names of the required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.blob_handle.is_empty() {
            missing.push("blobHandle");
        }
        if self.encryption_key.is_empty() {
            missing.push("encryptionKey");
        }
        if self.iv.is_empty() {
            missing.push("iv");
        }
        if self.auth_tag.is_empty() {
            missing.push("authTag");
        }
        missing
    }
}

/// Durable metadata for a fragmented, encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub mime_type: String,
    /// Length of the original plaintext
    pub size: u64,
    pub fragment_count: u32,
    #[serde(default)]
    pub fragments: Vec<FragmentRecord>,
    /// Commit marker: set only once every fragment is stored
    #[serde(default)]
    pub is_complete: bool,
    /// Unix timestamp (seconds)
    pub upload_date: u64,
}

impl FileRecord {
    /// Structural problems that make the record unusable for reassembly.
    ///
    /// Does not look at `is_complete` or at the blob store; callers check
    /// those separately. An empty result means the fragment list is sound.
    pub fn fragment_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.fragments.len() != self.fragment_count as usize {
            issues.push(format!(
                "expected {} fragments, found {}",
                self.fragment_count,
                self.fragments.len()
            ));
        }

        let mut seen = BTreeSet::new();
        for fragment in &self.fragments {
            let n = fragment.fragment_number;
            if n == 0 || n > self.fragment_count {
                issues.push(format!(
                    "fragment number {n} out of range 1..={}",
                    self.fragment_count
                ));
            } else if !seen.insert(n) {
                issues.push(format!("duplicate fragment number {n}"));
            }

            let missing = fragment.missing_fields();
            if !missing.is_empty() {
                issues.push(format!("fragment {n}: missing {}", missing.join(", ")));
            }
        }

        issues
    }

    /// Fragments in reassembly order.
    pub fn sorted_fragments(&self) -> Vec<&FragmentRecord> {
        let mut sorted: Vec<&FragmentRecord> = self.fragments.iter().collect();
        sorted.sort_by_key(|f| f.fragment_number);
        sorted
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_id: self.id.clone(),
            original_name: self.original_name.clone(),
            size: self.size,
            upload_date: self.upload_date,
            mime_type: self.mime_type.clone(),
        }
    }

    pub fn receipt(&self) -> UploadReceipt {
        UploadReceipt {
            file_id: self.id.clone(),
            original_name: self.original_name.clone(),
            size: self.size,
            upload_date: self.upload_date,
        }
    }
}

/// Listing projection. Carries no fragment secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub original_name: String,
    pub size: u64,
    pub upload_date: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_id: String,
    pub original_name: String,
    pub size: u64,
    pub upload_date: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReceipt {
    pub file_id: String,
    pub original_name: String,
}

/// Reconstructed file content plus the metadata replayed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub mime_type: String,
    pub original_name: String,
    pub content: Vec<u8>,
}

impl DownloadedFile {
    /// Value for a `Content-Disposition` header.
    pub fn content_disposition(&self) -> String {
        let escaped = self.original_name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("attachment; filename=\"{escaped}\"")
    }
}

/// Time-limited read URL for one fragment's ciphertext. `url` is `None` when
/// the blob backend cannot presign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentLink {
    pub fragment_number: u32,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptedFile {
    pub file_id: String,
    pub original_name: String,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid_files: Vec<FileSummary>,
    pub corrupted_files: Vec<CorruptedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedFile {
    pub file_id: String,
    pub original_name: String,
    pub issues: Vec<String>,
    /// Blob deletions that failed and were left behind
    pub blob_failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_files: Vec<CleanedFile>,
    /// Corrupted files whose record could not be removed
    pub failed_files: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub file_id: String,
    pub original_name: String,
    pub error: String,
}
