//! fv-storage: fragment blob storage on OpenDAL (S3, local fs, memory)

pub mod blob;
pub mod health;
pub mod operator;

pub use blob::{fragment_object_key, BlobStore, OpendalBlobStore};
pub use health::check_health;
pub use operator::{build_from_config, build_operator, S3Credentials, S3Settings};
