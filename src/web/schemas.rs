//! Request and response bodies for the HTTP surface.

use crate::db::Category;
use crate::engine::{ResolveOutcome, VerifyOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response for public key endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Transport RSA public key (SubjectPublicKeyInfo PEM)
    pub public_key: String,
}

/// Create an identity
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(alias = "user_type")]
    pub category: Category,
}

/// Set or replace a secret in plaintext (trusted administrative path)
#[derive(Deserialize)]
pub struct SaveSecretRequest {
    pub username: String,
    /// Base32 TOTP secret
    pub secret_plain: String,
    #[serde(default)]
    pub secret_expires_at: Option<DateTime<Utc>>,
}

impl Drop for SaveSecretRequest {
    fn drop(&mut self) {
        self.secret_plain.zeroize();
    }
}

/// Set or replace a secret encrypted under the transport public key
#[derive(Debug, Deserialize)]
pub struct EncryptedSecretRequest {
    pub username: String,
    /// Base64 RSA-OAEP (SHA-256) ciphertext of the base32 secret
    pub encrypted_secret: String,
    #[serde(default)]
    pub secret_expires_at: Option<DateTime<Utc>>,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Verify a code for a known identity
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub username: String,
    pub totp_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    pub access_granted: bool,
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        Self {
            success: outcome.is_granted(),
            message: outcome.message().to_string(),
            access_granted: outcome.is_granted(),
        }
    }
}

/// How a code reached the reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMethod {
    #[default]
    Manual,
    Voice,
}

/// Anonymous code submitted at the door reader
#[derive(Debug, Deserialize)]
pub struct ReaderRequest {
    pub code: String,
    #[serde(default)]
    pub method: InputMethod,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReaderResponse {
    pub success: bool,
    pub message: String,
    pub access_granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub method: InputMethod,
}

impl ReaderResponse {
    pub fn new(outcome: &ResolveOutcome, method: InputMethod) -> Self {
        Self {
            success: outcome.is_granted(),
            message: outcome.message(),
            access_granted: outcome.is_granted(),
            username: outcome.identity_name().map(str::to_string),
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DenyReason;

    #[test]
    fn test_create_request_accepts_user_type_alias() {
        let req: CreateUserRequest =
            serde_json::from_str(r#"{"username":"alice","user_type":"guest"}"#).unwrap();
        assert_eq!(req.category, Category::Guest);

        let req: CreateUserRequest =
            serde_json::from_str(r#"{"username":"bob","category":"short_lived"}"#).unwrap();
        assert_eq!(req.category, Category::Guest);
    }

    #[test]
    fn test_reader_request_defaults_to_manual() {
        let req: ReaderRequest = serde_json::from_str(r#"{"code":"123 456"}"#).unwrap();
        assert_eq!(req.method, InputMethod::Manual);
    }

    #[test]
    fn test_verify_response_from_outcome() {
        let denied = VerifyResponse::from(VerifyOutcome::Denied(DenyReason::SecretNotSet));
        assert!(!denied.access_granted);
        assert_eq!(denied.message, "secret not set");

        let granted = VerifyResponse::from(VerifyOutcome::Granted);
        assert!(granted.success && granted.access_granted);
    }

    #[test]
    fn test_reader_response_omits_username_on_no_match() {
        let resp = ReaderResponse::new(&ResolveOutcome::NoMatch, InputMethod::Voice);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("username").is_none());
        assert_eq!(json["method"], "voice");
        assert_eq!(json["access_granted"], false);
    }
}
