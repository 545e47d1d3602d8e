//! fv-crypto: per-fragment authenticated encryption
//!
//! Every fragment gets its own random 256-bit key and 96-bit nonce, so no
//! key or nonce is ever shared between fragments or files.
//!
//! ```text
//! plaintext fragment ──AES-256-GCM(key, iv)──▶ ciphertext (same length)
//!                                          └─▶ 16-byte detached tag
//! ```
//!
//! The ciphertext goes to the blob store; key, iv and tag live in the
//! fragment's metadata record.

pub mod codec;
pub mod keys;

pub use codec::{decrypt, decrypt_bytes, encrypt, Sealed};
pub use keys::{generate_iv, generate_key, AuthTag, FragmentKey, Iv};

/// AES-256 key length
pub const KEY_SIZE: usize = 32;

/// GCM nonce length (96-bit)
pub const IV_SIZE: usize = 12;

/// GCM authentication tag length
pub const TAG_SIZE: usize = 16;
