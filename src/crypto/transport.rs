//! Transport key manager: the RSA key pair provisioning clients encrypt
//! secrets against.
//!
//! The private key is written unencrypted (PKCS#1 PEM, mode 0400) and the
//! public key as SubjectPublicKeyInfo PEM (mode 0444). Keys are loaded or
//! generated once at startup and verified with an encrypt/decrypt round trip
//! before the manager is handed out.

use super::{write_key_file, CryptoError, CryptoResult};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

pub const PRIVATE_KEY_FILE: &str = "controller_private.pem";
pub const PUBLIC_KEY_FILE: &str = "controller_public.pem";

const SELF_TEST_PLAINTEXT: &[u8] = b"test";

/// OAEP padding with SHA-256 for both the digest and MGF1, empty label.
fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Owner of the transport RSA key pair.
pub struct TransportKeyManager {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_pem: String,
}

impl TransportKeyManager {
    /// Wrap an in-memory key pair.
    pub fn from_private_key(private_key: RsaPrivateKey) -> CryptoResult<Self> {
        let public_key = private_key.to_public_key();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key,
            public_key_pem,
        })
    }

    /// Generate a fresh in-memory key pair (not persisted).
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Load the key pair from `dir`, generating it if either file is missing.
    ///
    /// If the files exist but cannot be parsed, they are deleted and a new
    /// pair is generated and reloaded from disk.
    pub fn load_or_generate(dir: &Path, bits: usize) -> CryptoResult<Self> {
        let paths = KeyPaths::new(dir);

        if !paths.private.exists() || !paths.public.exists() {
            warn!("Transport keys not found in {}, generating", dir.display());
            paths.remove()?;
            paths.generate(bits)?;
            return paths.load();
        }

        match paths.load() {
            Ok(manager) => Ok(manager),
            Err(e) => {
                error!("Failed to load transport keys: {}", e);
                warn!("Regenerating transport keys");
                paths.remove()?;
                paths.generate(bits)?;
                paths.load()
            }
        }
    }

    /// Run the startup protocol: load-or-generate and self-test, retrying up
    /// to `attempts` times with `backoff` between tries.
    ///
    /// A key pair that fails its self-test is deleted so the next attempt
    /// generates a new one. Generation runs on the blocking pool.
    pub async fn initialize(
        dir: &Path,
        bits: usize,
        attempts: u32,
        backoff: Duration,
    ) -> CryptoResult<Self> {
        let attempts = attempts.max(1);
        let mut last_error = CryptoError::SelfTestFailed;

        for attempt in 1..=attempts {
            let key_dir: PathBuf = dir.to_path_buf();
            let loaded = tokio::task::spawn_blocking(move || Self::load_or_generate(&key_dir, bits))
                .await
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

            match loaded {
                Ok(manager) if manager.self_test() => {
                    info!("Transport keys passed encrypt/decrypt self-test");
                    return Ok(manager);
                }
                Ok(_) => {
                    warn!(attempt, "Transport key self-test failed, discarding keys");
                    KeyPaths::new(dir).remove()?;
                    last_error = CryptoError::SelfTestFailed;
                }
                Err(e) => {
                    warn!(attempt, "Transport key initialization failed: {}", e);
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error)
    }

    /// Public key as SubjectPublicKeyInfo PEM, for provisioning clients.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decrypt an RSA-OAEP (SHA-256) ciphertext with the private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        self.private_key
            .decrypt(oaep(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt a known value with the public key and check that the private
    /// key recovers it.
    pub fn self_test(&self) -> bool {
        let Ok(ciphertext) = self
            .public_key
            .encrypt(&mut OsRng, oaep(), SELF_TEST_PLAINTEXT)
        else {
            return false;
        };
        matches!(self.decrypt(&ciphertext), Ok(p) if p.as_slice() == SELF_TEST_PLAINTEXT)
    }
}

impl std::fmt::Debug for TransportKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKeyManager")
            .field("public_key_pem", &self.public_key_pem)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Encrypt `plaintext` for a server whose public key is given as PEM.
///
/// Client half of the transport channel, used by provisioning tools.
pub fn encrypt_for_transport(public_key_pem: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    public_key
        .encrypt(&mut OsRng, oaep(), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

struct KeyPaths {
    private: PathBuf,
    public: PathBuf,
}

impl KeyPaths {
    fn new(dir: &Path) -> Self {
        Self {
            private: dir.join(PRIVATE_KEY_FILE),
            public: dir.join(PUBLIC_KEY_FILE),
        }
    }

    fn generate(&self, bits: usize) -> CryptoResult<()> {
        info!(bits, "Generating transport RSA key pair");
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        write_key_file(&self.private, private_pem.as_bytes(), 0o400)?;

        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        write_key_file(&self.public, public_pem.as_bytes(), 0o444)?;

        info!("Transport key pair saved to {}", self.private.display());
        Ok(())
    }

    fn load(&self) -> CryptoResult<TransportKeyManager> {
        let private_pem = Zeroizing::new(fs::read_to_string(&self.private)?);
        let private_key = RsaPrivateKey::from_pkcs1_pem(&private_pem)
            .map_err(|e| CryptoError::InvalidKey(format!("private key: {}", e)))?;

        let public_pem = fs::read_to_string(&self.public)?;
        let public_key = RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| CryptoError::InvalidKey(format!("public key: {}", e)))?;

        if public_key != private_key.to_public_key() {
            return Err(CryptoError::InvalidKey(
                "public key does not match private key".to_string(),
            ));
        }

        info!("Transport keys loaded from disk");
        TransportKeyManager::from_private_key(private_key)
    }

    fn remove(&self) -> CryptoResult<()> {
        for path in [&self.private, &self.public] {
            match fs::remove_file(path) {
                Ok(()) => warn!("Removed transport key file {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small keys keep the tests fast; production uses 4096 bits.
    const TEST_BITS: usize = 2048;

    #[test]
    fn test_round_trip_through_pem() {
        let manager = TransportKeyManager::generate(TEST_BITS).unwrap();
        assert!(manager.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));

        let ciphertext =
            encrypt_for_transport(manager.public_key_pem(), b"JBSWY3DPEHPK3PXP").unwrap();
        let plaintext = manager.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"JBSWY3DPEHPK3PXP");
        assert!(manager.self_test());
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let manager = TransportKeyManager::generate(TEST_BITS).unwrap();
        assert!(matches!(
            manager.decrypt(b"not an rsa ciphertext"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_load_or_generate_reuses_and_recovers() {
        let dir = tempfile::tempdir().unwrap();

        let first = TransportKeyManager::load_or_generate(dir.path(), TEST_BITS).unwrap();
        let second = TransportKeyManager::load_or_generate(dir.path(), TEST_BITS).unwrap();
        assert_eq!(first.public_key_pem(), second.public_key_pem());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let private_mode = fs::metadata(dir.path().join(PRIVATE_KEY_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(private_mode & 0o777, 0o400);
            let public_mode = fs::metadata(dir.path().join(PUBLIC_KEY_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(public_mode & 0o777, 0o444);
        }

        // Corrupt the private key: the pair is regenerated.
        let private_path = dir.path().join(PRIVATE_KEY_FILE);
        fs::remove_file(&private_path).unwrap();
        fs::write(&private_path, "garbage").unwrap();

        let third = TransportKeyManager::load_or_generate(dir.path(), TEST_BITS).unwrap();
        assert_ne!(first.public_key_pem(), third.public_key_pem());
        assert!(third.self_test());
    }

    #[tokio::test]
    async fn test_initialize_generates_keys() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            TransportKeyManager::initialize(dir.path(), TEST_BITS, 3, Duration::from_millis(1))
                .await
                .unwrap();
        assert!(manager.self_test());
        assert!(dir.path().join(PUBLIC_KEY_FILE).exists());
    }

    #[tokio::test]
    async fn test_initialize_fails_after_retry_budget() {
        // A regular file where the key directory should be makes every
        // attempt fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let result =
            TransportKeyManager::initialize(&blocker, TEST_BITS, 2, Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
