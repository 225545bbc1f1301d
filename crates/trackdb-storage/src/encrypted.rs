//! Encrypted storage
//!
//! File layout: one format version byte, a 16-byte initialization vector, then
//! the AES-128-GCM ciphertext of the JSON snapshot. The key is the machine's
//! hardware fingerprint unless one is supplied.

use std::fmt;
use std::path::Path;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::AesGcm;
use rand::RngCore;
use trackdb_core::HardwareFingerprint;
use typenum::U16;

use crate::error::{StorageError, StorageResult};
use crate::strategy::StorageStrategy;

/// Format version written as the first byte of every file
pub const FORMAT_VERSION: u8 = 1;

/// Length of the initialization vector following the version byte
pub const IV_LEN: usize = 16;

type Cipher = AesGcm<Aes128, U16>;

/// Stores snapshots encrypted with a 16-byte key
#[derive(Clone)]
pub struct EncryptedStorage {
    key: [u8; 16],
}

impl EncryptedStorage {
    /// Encrypt with the current machine's fingerprint
    pub fn new() -> Self {
        Self::with_fingerprint(HardwareFingerprint::current())
    }

    /// Encrypt with a given fingerprint
    pub fn with_fingerprint(fingerprint: HardwareFingerprint) -> Self {
        Self::with_key(*fingerprint.as_bytes())
    }

    /// Encrypt with an explicit key
    pub fn with_key(key: [u8; 16]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Cipher {
        Cipher::new(GenericArray::from_slice(&self.key))
    }
}

impl Default for EncryptedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EncryptedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStorage").finish_non_exhaustive()
    }
}

impl StorageStrategy for EncryptedStorage {
    fn name(&self) -> &'static str {
        "encrypted"
    }

    fn encode(&self, plain: &[u8]) -> StorageResult<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = self
            .cipher()
            .encrypt(GenericArray::from_slice(&iv), plain)
            .map_err(|e| StorageError::encryption(e.to_string()))?;

        let mut stored = Vec::with_capacity(1 + IV_LEN + ciphertext.len());
        stored.push(FORMAT_VERSION);
        stored.extend_from_slice(&iv);
        stored.extend_from_slice(&ciphertext);
        Ok(stored)
    }

    fn decode(&self, path: &Path, stored: &[u8]) -> StorageResult<Vec<u8>> {
        let (&version, rest) = stored.split_first().ok_or_else(|| StorageError::Truncated {
            path: path.to_path_buf(),
            len: stored.len(),
        })?;
        if version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedFormat {
                path: path.to_path_buf(),
                version,
            });
        }
        if rest.len() < IV_LEN {
            return Err(StorageError::Truncated {
                path: path.to_path_buf(),
                len: stored.len(),
            });
        }

        let (iv, ciphertext) = rest.split_at(IV_LEN);
        self.cipher()
            .decrypt(GenericArray::from_slice(iv), ciphertext)
            .map_err(|e| StorageError::decryption(path, e.to_string()))
    }
}
