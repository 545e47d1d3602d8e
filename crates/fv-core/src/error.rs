use std::fmt;

use thiserror::Error;

pub type FvResult<T> = Result<T, FvError>;

/// Stable error classification exposed to the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    EncryptionError,
    DecryptionError,
    AuthenticationError,
    BlobStoreError,
    MetadataError,
    NotFound,
    IncompleteFile,
    CorruptFile,
    IntegrityError,
    FragmentsFailed,
    Timeout,
    ConfigError,
    Io,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::EncryptionError => "encryption_error",
            ErrorKind::DecryptionError => "decryption_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::BlobStoreError => "blob_store_error",
            ErrorKind::MetadataError => "metadata_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::IncompleteFile => "incomplete_file",
            ErrorKind::CorruptFile => "corrupt_file",
            ErrorKind::IntegrityError => "integrity_error",
            ErrorKind::FragmentsFailed => "fragments_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::Io => "io_error",
            ErrorKind::Other => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fragment that could not be fetched and decrypted within its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFailure {
    pub fragment_number: u32,
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for FragmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fragment {} after {} attempt(s): {}",
            self.fragment_number, self.attempts, self.last_error
        )
    }
}

#[derive(Debug, Error)]
pub enum FvError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("blob store error: {0}")]
    BlobStore(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file upload is incomplete: {0}")]
    IncompleteFile(String),

    #[error("file {file_id} is corrupted: {}", .issues.join("; "))]
    CorruptFile { file_id: String, issues: Vec<String> },

    #[error(
        "reconstructed size of {file_id} ({actual} bytes) does not match recorded size ({expected} bytes)"
    )]
    Integrity {
        file_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("failed to retrieve {} fragment(s) of {file_id}: {}", .failures.len(), join_failures(.failures))]
    FragmentsFailed {
        file_id: String,
        failures: Vec<FragmentFailure>,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_failures(failures: &[FragmentFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FvError::InvalidInput(_) => ErrorKind::InvalidInput,
            FvError::Encryption(_) => ErrorKind::EncryptionError,
            FvError::Decryption(_) => ErrorKind::DecryptionError,
            FvError::Authentication(_) => ErrorKind::AuthenticationError,
            FvError::BlobStore(_) => ErrorKind::BlobStoreError,
            FvError::Metadata(_) => ErrorKind::MetadataError,
            FvError::NotFound(_) => ErrorKind::NotFound,
            FvError::IncompleteFile(_) => ErrorKind::IncompleteFile,
            FvError::CorruptFile { .. } => ErrorKind::CorruptFile,
            FvError::Integrity { .. } => ErrorKind::IntegrityError,
            FvError::FragmentsFailed { .. } => ErrorKind::FragmentsFailed,
            FvError::Timeout(_) => ErrorKind::Timeout,
            FvError::Config(_) => ErrorKind::ConfigError,
            FvError::Io(_) => ErrorKind::Io,
            FvError::Other(_) => ErrorKind::Other,
        }
    }

    /// HTTP-style status for the API layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::IncompleteFile => 409,
            ErrorKind::CorruptFile | ErrorKind::IntegrityError => 422,
            ErrorKind::BlobStoreError | ErrorKind::FragmentsFailed => 502,
            ErrorKind::Timeout => 504,
            _ => 500,
        }
    }

    /// Transient failures worth another attempt inside a bounded retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BlobStoreError | ErrorKind::AuthenticationError | ErrorKind::Timeout
        )
    }

    /// Fragment numbers named by an aggregate download failure.
    pub fn failed_fragments(&self) -> Vec<u32> {
        match self {
            FvError::FragmentsFailed { failures, .. } => {
                failures.iter().map(|f| f.fragment_number).collect()
            }
            _ => Vec::new(),
        }
    }
}
