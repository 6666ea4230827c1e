//! Envelope cipher: AES-256-GCM encryption of OTP secrets at rest.
//!
//! Blob layout is `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The
//! owning identity's name is bound in as associated data, so a blob copied
//! onto another identity's row fails authentication.

use super::{write_key_file, CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use std::fs;
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

/// Master key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;
/// Nonce size in bytes (96-bit GCM nonce)
pub const NONCE_SIZE: usize = 12;

/// Authenticated symmetric cipher over the process-wide master key.
///
/// A fresh `Aes256Gcm` instance is built for every operation, so a shared
/// reference can be used from any number of tasks at once.
pub struct EnvelopeCipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl EnvelopeCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Generate a random master key (not persisted).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        let cipher = Self::new(key);
        key.fill(0);
        cipher
    }

    /// Load the master key from `path`, or generate and persist a new one
    /// with owner read-only permissions if the file does not exist.
    ///
    /// An existing file of the wrong length is an error: the key is never
    /// regenerated over an existing file, since every stored secret would
    /// become undecryptable.
    pub fn load_or_generate(path: &Path) -> CryptoResult<Self> {
        if path.exists() {
            let bytes = Zeroizing::new(fs::read(path)?);
            let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "master key at {} must be {} bytes, found {}",
                    path.display(),
                    KEY_SIZE,
                    bytes.len()
                ))
            })?;
            info!("Master key loaded from {}", path.display());
            return Ok(Self::new(key));
        }

        let cipher = Self::generate();
        write_key_file(path, cipher.key.as_slice(), 0o400)?;
        info!("Generated new master key at {}", path.display());
        Ok(cipher)
    }

    fn cipher(&self) -> CryptoResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Encrypt `plaintext`, binding `associated_data` into the tag.
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Tampering, a different key, or different associated data all yield
    /// `DecryptionFailed`; no partial plaintext is ever returned.
    pub fn decrypt(
        &self,
        blob: &[u8],
        associated_data: &[u8],
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if blob.len() < NONCE_SIZE {
            return Err(CryptoError::TruncatedBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);

        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}
