//! fv-engine: the fragment pipelines behind fragvault
//!
//! Upload splits a file into a fixed number of fragments, encrypts each under
//! its own key and nonce, stores the ciphertext and commits one metadata
//! record. Download reverses that with per-fragment retries and a final
//! length check. Maintenance covers delete, list, validate and cleanup.

pub mod download;
pub mod maintenance;
pub mod metadata;
pub mod retry;
pub mod service;
pub mod upload;

pub use download::DownloadPipeline;
pub use maintenance::Maintenance;
pub use metadata::{JsonMetadataStore, MemoryMetadataStore, MetadataStore};
pub use retry::RetryPolicy;
pub use service::FileService;
pub use upload::UploadPipeline;
