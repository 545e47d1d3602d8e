//! Fragment key material: random generation, length validation, base64 wire form

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fv_core::{FvError, FvResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// A per-fragment 256-bit AES key. Zeroized on drop.
#[derive(Clone)]
pub struct FragmentKey {
    bytes: [u8; KEY_SIZE],
}

impl FragmentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Validate and copy a key of exactly `KEY_SIZE` bytes.
    pub fn from_slice(bytes: &[u8]) -> FvResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            FvError::Decryption(format!(
                "invalid key length: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn from_base64(encoded: &str) -> FvResult<Self> {
        let mut raw = decode_b64("key", encoded)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }
}

impl Drop for FragmentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FragmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 96-bit GCM nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> FvResult<Self> {
        let arr: [u8; IV_SIZE] = bytes.try_into().map_err(|_| {
            FvError::Decryption(format!(
                "invalid iv length: {} bytes (expected {IV_SIZE})",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn from_base64(encoded: &str) -> FvResult<Self> {
        Self::from_slice(&decode_b64("iv", encoded)?)
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

/// A 128-bit GCM authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTag([u8; TAG_SIZE]);

impl AuthTag {
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> FvResult<Self> {
        let arr: [u8; TAG_SIZE] = bytes.try_into().map_err(|_| {
            FvError::Decryption(format!(
                "invalid auth tag length: {} bytes (expected {TAG_SIZE})",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn from_base64(encoded: &str) -> FvResult<Self> {
        Self::from_slice(&decode_b64("auth tag", encoded)?)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

fn decode_b64(what: &str, encoded: &str) -> FvResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| FvError::Decryption(format!("{what} is not valid base64: {e}")))
}

/// Generate a random 256-bit fragment key.
pub fn generate_key() -> FragmentKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    FragmentKey::from_bytes(bytes)
}

/// Generate a random 96-bit nonce.
pub fn generate_iv() -> Iv {
    let mut bytes = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Iv::from_bytes(bytes)
}
