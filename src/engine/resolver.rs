//! Anonymous code resolution.
//!
//! A submitted code is a one-way function of a secret and the clock, so no
//! index can map it back to an identity. Resolution scans every live
//! identity and runs the single-identity check against each. The caller
//! learns only whether some identity matched, never which candidates were
//! tried or why they failed.

use crate::crypto::otp::CODE_DIGITS;
use crate::engine::{CredentialManager, VerifyOutcome};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Strip every non-digit character and require exactly six digits.
pub fn normalize_code(raw: &str) -> AppResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != CODE_DIGITS {
        return Err(AppError::MalformedCode);
    }
    Ok(digits)
}

/// Result of resolving an anonymous code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Granted { name: String },
    NoMatch,
}

impl ResolveOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn identity_name(&self) -> Option<&str> {
        match self {
            Self::Granted { name } => Some(name),
            Self::NoMatch => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Granted { name } => format!("Access granted. Welcome, {}", name),
            Self::NoMatch => "Invalid access code".to_string(),
        }
    }
}

/// Resolves a bare code to the identity it authenticates.
#[derive(Debug, Clone)]
pub struct CodeResolver {
    credentials: Arc<CredentialManager>,
}

impl CodeResolver {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self { credentials }
    }

    pub async fn resolve(&self, raw_input: &str) -> AppResult<ResolveOutcome> {
        self.resolve_at(raw_input, Utc::now()).await
    }

    /// Resolve `raw_input` against the time step containing `now`.
    ///
    /// Malformed input is rejected before any identity is read. Candidates
    /// without a secret or past their expiry are skipped; a candidate whose
    /// secret fails to decrypt simply does not match.
    pub async fn resolve_at(
        &self,
        raw_input: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ResolveOutcome> {
        let code = normalize_code(raw_input)?;

        let identities = self.credentials.list().await?;
        let mut checked = 0usize;

        for identity in identities
            .iter()
            .filter(|i| i.has_secret() && !i.is_expired_at(now))
        {
            checked += 1;
            match self.credentials.check_identity(identity, &code, now) {
                VerifyOutcome::Granted => {
                    info!("Code resolved to {}", identity.name);
                    return Ok(ResolveOutcome::Granted {
                        name: identity.name.clone(),
                    });
                }
                VerifyOutcome::Denied(reason) => {
                    debug!("Candidate {} did not match: {:?}", identity.name, reason);
                }
            }
        }

        info!(checked, "Code did not match any identity");
        Ok(ResolveOutcome::NoMatch)
    }
}
