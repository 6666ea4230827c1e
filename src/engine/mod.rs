//! Secret provisioning and verification engine.
//!
//! ## Security Model
//!
//! - Provisioning clients encrypt secrets with the transport RSA public key;
//!   plaintext secrets never cross the wire
//! - Secrets are re-encrypted under the master key before they reach the
//!   store, bound to the identity name as associated data
//! - A submitted code carries no identity; resolution decrypts and tests
//!   every live candidate and reports only "match" or "no match"
//!
//! ## Usage
//!
//! ```ignore
//! let keys = Arc::new(KeyRing::initialize(&config.keys).await?);
//! let store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(pool));
//! let credentials = Arc::new(CredentialManager::new(store, keys));
//! let resolver = CodeResolver::new(credentials.clone());
//!
//! credentials.create_identity("alice", Category::Guest).await?;
//! credentials.provision_secret("alice", &ciphertext, None).await?;
//! let outcome = resolver.resolve("123 456").await?;
//! ```

pub mod lifecycle;
pub mod resolver;

pub use lifecycle::{CredentialManager, DenyReason, VerifyOutcome};
pub use resolver::{normalize_code, CodeResolver, ResolveOutcome};

use crate::config::KeysConfig;
use crate::crypto::{EnvelopeCipher, TransportKeyManager};
use crate::error::{AppError, AppResult};
use tracing::info;

/// Process-wide key material, loaded once at startup and immutable after.
///
/// Passed by `Arc` into every component that performs cryptographic
/// operations.
#[derive(Debug)]
pub struct KeyRing {
    envelope: EnvelopeCipher,
    transport: TransportKeyManager,
}

impl KeyRing {
    pub fn new(envelope: EnvelopeCipher, transport: TransportKeyManager) -> Self {
        Self {
            envelope,
            transport,
        }
    }

    /// Load or generate the master key and transport key pair.
    ///
    /// Any failure here is fatal: the service must not accept traffic
    /// without working keys.
    pub async fn initialize(config: &KeysConfig) -> AppResult<Self> {
        let envelope = EnvelopeCipher::load_or_generate(&config.master_key_path())
            .map_err(|e| AppError::KeyInitialization(format!("master key: {}", e)))?;

        let transport = TransportKeyManager::initialize(
            &config.dir,
            config.rsa_bits,
            config.init_attempts,
            config.init_backoff(),
        )
        .await
        .map_err(|e| AppError::KeyInitialization(format!("transport keys: {}", e)))?;

        info!("Key ring initialized from {}", config.dir.display());
        Ok(Self::new(envelope, transport))
    }

    pub fn envelope(&self) -> &EnvelopeCipher {
        &self.envelope
    }

    pub fn transport(&self) -> &TransportKeyManager {
        &self.transport
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::{queries::setup_test_db, IdentityStore, SqliteIdentityStore};
    use std::sync::{Arc, OnceLock};

    /// One RSA key for the whole test binary; generation is the slow part.
    fn shared_private_key() -> rsa::RsaPrivateKey {
        static KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("RSA key generation")
        })
        .clone()
    }

    pub fn test_key_ring() -> Arc<KeyRing> {
        let transport = TransportKeyManager::from_private_key(shared_private_key()).unwrap();
        Arc::new(KeyRing::new(EnvelopeCipher::generate(), transport))
    }

    pub async fn test_credentials() -> (Arc<CredentialManager>, Arc<dyn IdentityStore>) {
        let store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(setup_test_db().await));
        let manager = Arc::new(CredentialManager::new(store.clone(), test_key_ring()));
        (manager, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_creates_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeysConfig {
            dir: dir.path().join("keys"),
            rsa_bits: 2048,
            init_attempts: 1,
            init_backoff_ms: 1,
        };

        let ring = KeyRing::initialize(&config).await.unwrap();
        assert!(config.master_key_path().exists());
        assert!(ring.transport().self_test());

        // A second start reuses both keys.
        let blob = ring.envelope().encrypt(b"secret", b"alice").unwrap();
        let again = KeyRing::initialize(&config).await.unwrap();
        assert_eq!(again.transport().public_key_pem(), ring.transport().public_key_pem());
        assert!(again.envelope().decrypt(&blob, b"alice").is_ok());
    }

    #[tokio::test]
    async fn test_initialize_rejects_corrupt_master_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeysConfig {
            dir: dir.path().to_path_buf(),
            rsa_bits: 2048,
            init_attempts: 1,
            init_backoff_ms: 1,
        };
        std::fs::write(config.master_key_path(), b"short").unwrap();

        let result = KeyRing::initialize(&config).await;
        assert!(matches!(result, Err(AppError::KeyInitialization(_))));
    }
}
