//! Cryptographic primitives for secret provisioning and storage.
//!
//! Uses:
//! - RSA-OAEP (SHA-256) for receiving secrets from provisioning clients
//! - AES-256-GCM for encrypting secrets at rest, bound to the identity name
//! - HMAC-SHA1 HOTP (RFC 4226) over 30-second time steps for access codes

pub mod envelope;
pub mod otp;
pub mod transport;

pub use envelope::EnvelopeCipher;
pub use otp::{Hotp, TIME_STEP_SECS};
pub use transport::TransportKeyManager;

use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Transport key self-test failed")]
    SelfTestFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed - invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Ciphertext blob too short")]
    TruncatedBlob,

    #[error("Invalid OTP secret: {0}")]
    InvalidSecret(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Create the key directory with owner-only permissions.
pub(crate) fn ensure_key_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

/// Write a new key file with the given Unix permission bits.
///
/// Fails if the file already exists; key files are never overwritten in place.
/// The mode is applied explicitly after creation so the process umask cannot
/// narrow it.
pub(crate) fn write_key_file(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_key_dir(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path)?;
    file.write_all(data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_write_key_file_sets_exact_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();

        for (name, mode) in [("public.pem", 0o444), ("private.pem", 0o400)] {
            let path = dir.path().join("keys").join(name);
            write_key_file(&path, b"key", mode).unwrap();
            let actual = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(actual & 0o777, mode, "{}", name);
        }

        let key_dir_mode = fs::metadata(dir.path().join("keys"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(key_dir_mode & 0o077, 0);
    }

    #[test]
    fn test_write_key_file_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        write_key_file(&path, b"first", 0o400).unwrap();

        let err = write_key_file(&path, b"second", 0o400).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }
}
