//! AES-128-CBC segment decryption, §4.4/§9: zero-padded, never PKCS7-unpadded.

use aes::Aes128;
use cipher::block_padding::NoPadding;
use cipher::{BlockModeDecrypt, KeyIvInit};
use tracing::warn;

use crate::error::DownloadError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypt one segment's ciphertext with `key`/`iv`.
///
/// Ciphertext shorter than a 16-byte multiple is zero-padded before
/// decryption, and every decrypted byte is kept — this is a deliberate
/// deviation from standards-compliant PKCS7 unpadding, preserved for
/// bug-compatibility with the upstream site's occasional non-aligned segments.
pub fn decrypt_segment(key: &[u8], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, DownloadError> {
    if key.len() != 16 {
        return Err(DownloadError::BadKey(key.len()));
    }
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }

    let mut buffer = ciphertext.to_vec();
    if !buffer.len().is_multiple_of(16) {
        warn!(original_len = ciphertext.len(), "zero-padding non-aligned segment ciphertext before decryption");
        buffer.resize(buffer.len().div_ceil(16) * 16, 0u8);
    }

    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| DownloadError::ConfigError(format!("invalid AES key/iv: {e}")))?;

    let decrypted_len = cipher
        .decrypt_padded::<NoPadding>(&mut buffer)
        .map_err(|e| DownloadError::ConfigError(format!("AES-CBC decryption failed: {e}")))?
        .len();

    buffer.truncate(decrypted_len);
    Ok(buffer)
}
