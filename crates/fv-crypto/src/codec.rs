//! AES-256-GCM fragment encryption with a detached authentication tag
//!
//! ```text
//! encrypt(plaintext, key) -> { iv: 12 bytes, tag: 16 bytes, ciphertext: len(plaintext) }
//! ```
//!
//! The ciphertext is stored without the nonce or tag; both travel in the
//! fragment record and must be supplied again to decrypt.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use fv_core::{FvError, FvResult};

use crate::keys::{generate_iv, AuthTag, FragmentKey, Iv};

/// Output of one encryption: everything needed to decrypt later.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub iv: Iv,
    pub tag: AuthTag,
    pub ciphertext: Vec<u8>,
}

/// Encrypt a fragment under `key` with a freshly generated nonce.
pub fn encrypt(plaintext: &[u8], key: &FragmentKey) -> FvResult<Sealed> {
    let iv = generate_iv();
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv.as_bytes()), b"", &mut buffer)
        .map_err(|e| FvError::Encryption(format!("AES-256-GCM encryption failed: {e}")))?;

    if buffer.len() != plaintext.len() {
        return Err(FvError::Encryption(format!(
            "ciphertext length {} differs from plaintext length {}",
            buffer.len(),
            plaintext.len()
        )));
    }

    let mut tag_bytes = [0u8; crate::TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        iv,
        tag: AuthTag::from_bytes(tag_bytes),
        ciphertext: buffer,
    })
}

/// Decrypt and authenticate a fragment.
///
/// Fails with an authentication error if the tag does not verify, which
/// covers tampered ciphertext, a wrong key, a wrong nonce or a wrong tag.
pub fn decrypt(
    ciphertext: &[u8],
    key: &FragmentKey,
    iv: &Iv,
    tag: &AuthTag,
) -> FvResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv.as_bytes()),
            b"",
            &mut buffer,
            Tag::from_slice(tag.as_bytes()),
        )
        .map_err(|_| {
            FvError::Authentication(
                "tag verification failed: wrong key, corrupted or tampered data".into(),
            )
        })?;

    Ok(buffer)
}

/// Decrypt from untyped buffers, validating every length before the cipher runs.
pub fn decrypt_bytes(ciphertext: &[u8], key: &[u8], iv: &[u8], tag: &[u8]) -> FvResult<Vec<u8>> {
    let key = FragmentKey::from_slice(key)?;
    let iv = Iv::from_slice(iv)?;
    let tag = AuthTag::from_slice(tag)?;
    decrypt(ciphertext, &key, &iv, &tag)
}
