//! Credential lifecycle: identity records, secret provisioning and
//! single-identity verification.

use crate::crypto::otp::{self, Hotp};
use crate::db::{Category, Identity, IdentityStore, NewIdentity};
use crate::engine::KeyRing;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a verification was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    IdentityNotFound,
    SecretExpired,
    SecretNotSet,
    DecryptionFailed,
    InvalidSecret,
    InvalidCode,
}

impl DenyReason {
    /// Caller-facing text. Cipher and secret-format failures share one
    /// generic message; the specific reason goes to the log only.
    pub fn message(&self) -> &'static str {
        match self {
            Self::IdentityNotFound => "identity not found",
            Self::SecretExpired => "secret expired",
            Self::SecretNotSet => "secret not set",
            Self::DecryptionFailed | Self::InvalidSecret => "verification error",
            Self::InvalidCode => "invalid code",
        }
    }
}

/// Result of checking a code against one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Granted,
    Denied(DenyReason),
}

impl VerifyOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Granted => "access granted",
            Self::Denied(reason) => reason.message(),
        }
    }
}

/// Owns identity records and orchestrates the transport and envelope
/// ciphers during provisioning.
pub struct CredentialManager {
    store: Arc<dyn IdentityStore>,
    keys: Arc<KeyRing>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn IdentityStore>, keys: Arc<KeyRing>) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Current transport public key for provisioning clients.
    pub fn public_key_pem(&self) -> &str {
        self.keys.transport().public_key_pem()
    }

    /// Create an unprovisioned identity whose secret expiry is derived from
    /// its category.
    pub async fn create_identity(&self, name: &str, category: Category) -> AppResult<Identity> {
        let secret_expires_at = Utc::now() + category.secret_lifetime();
        let identity = self
            .store
            .insert(NewIdentity {
                name: name.to_string(),
                category,
                secret_expires_at: Some(secret_expires_at),
            })
            .await?;

        info!(
            "Created identity {} (category: {}, secret expires: {})",
            identity.name, category, secret_expires_at
        );
        Ok(identity)
    }

    pub async fn get(&self, name: &str) -> AppResult<Identity> {
        self.store
            .find_by_name(name)
            .await?
            .ok_or_else(|| AppError::not_found(name))
    }

    pub async fn list(&self) -> AppResult<Vec<Identity>> {
        self.store.list_all().await
    }

    /// Attach a secret that arrived encrypted under the transport key.
    pub async fn provision_secret(
        &self,
        name: &str,
        transport_ciphertext: &[u8],
        explicit_expiry: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let identity = self.get(name).await?;

        let plaintext = self
            .keys
            .transport()
            .decrypt(transport_ciphertext)
            .map_err(|_| {
                warn!("Transport decryption failed for provisioning of {}", name);
                AppError::Decryption
            })?;
        if std::str::from_utf8(&plaintext).is_err() {
            warn!("Provisioned secret for {} is not valid UTF-8", name);
            return Err(AppError::Decryption);
        }

        self.store_secret(identity, &plaintext, explicit_expiry).await?;
        info!("Provisioned secret for {} via transport key", name);
        Ok(())
    }

    /// Attach a plaintext secret. Administrative path for trusted, local
    /// provisioning.
    pub async fn set_plaintext_secret(
        &self,
        name: &str,
        secret: &str,
        explicit_expiry: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let identity = self.get(name).await?;
        self.store_secret(identity, secret.as_bytes(), explicit_expiry)
            .await?;
        info!("Stored plaintext-provisioned secret for {}", name);
        Ok(())
    }

    async fn store_secret(
        &self,
        mut identity: Identity,
        secret: &[u8],
        explicit_expiry: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let blob = self
            .keys
            .envelope()
            .encrypt(secret, identity.name.as_bytes())?;

        identity.secret = Some(blob);
        if let Some(expires) = explicit_expiry {
            identity.secret_expires_at = Some(expires);
        }
        self.store.update(&identity).await
    }

    /// Drop the secret; the identity remains, unprovisioned.
    pub async fn revoke(&self, name: &str) -> AppResult<()> {
        let mut identity = self.get(name).await?;
        identity.secret = None;
        self.store.update(&identity).await?;
        info!("Revoked secret for {}", name);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> AppResult<()> {
        if !self.store.delete(name).await? {
            return Err(AppError::not_found(name));
        }
        info!("Deleted identity {}", name);
        Ok(())
    }

    /// Check `code` against the named identity at the current time.
    pub async fn verify(&self, name: &str, code: &str) -> AppResult<VerifyOutcome> {
        self.verify_at(name, code, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        name: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<VerifyOutcome> {
        let Some(identity) = self.store.find_by_name(name).await? else {
            warn!("Verification for unknown identity {}", name);
            return Ok(VerifyOutcome::Denied(DenyReason::IdentityNotFound));
        };

        let outcome = self.check_identity(&identity, code, now);
        match outcome {
            VerifyOutcome::Granted => info!("Access granted for {}", name),
            VerifyOutcome::Denied(reason) => {
                warn!("Access denied for {}: {:?}", name, reason)
            }
        }
        Ok(outcome)
    }

    /// Check `code` against an already-loaded identity record.
    ///
    /// Fails closed: expiry is checked before the secret is touched, and the
    /// code must match the HOTP value for the exact current time step.
    pub(crate) fn check_identity(
        &self,
        identity: &Identity,
        code: &str,
        now: DateTime<Utc>,
    ) -> VerifyOutcome {
        if identity.is_expired_at(now) {
            return VerifyOutcome::Denied(DenyReason::SecretExpired);
        }

        let Some(blob) = identity.secret.as_deref() else {
            return VerifyOutcome::Denied(DenyReason::SecretNotSet);
        };

        let secret = match self
            .keys
            .envelope()
            .decrypt(blob, identity.name.as_bytes())
        {
            Ok(secret) => secret,
            Err(_) => return VerifyOutcome::Denied(DenyReason::DecryptionFailed),
        };

        let Ok(secret) = std::str::from_utf8(&secret) else {
            return VerifyOutcome::Denied(DenyReason::InvalidSecret);
        };

        let hotp = match Hotp::from_base32(secret) {
            Ok(hotp) => hotp,
            Err(_) => return VerifyOutcome::Denied(DenyReason::InvalidSecret),
        };

        match hotp.verify(code, otp::counter_at(now)) {
            Ok(true) => VerifyOutcome::Granted,
            Ok(false) => VerifyOutcome::Denied(DenyReason::InvalidCode),
            Err(_) => VerifyOutcome::Denied(DenyReason::InvalidSecret),
        }
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
