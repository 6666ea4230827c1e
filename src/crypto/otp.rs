//! HOTP (RFC 4226) over 30-second time steps.
//!
//! Secrets travel and are stored as base32 strings, the format authenticator
//! apps enroll from. The raw key bytes only exist inside [`Hotp`].

use super::{CryptoError, CryptoResult};
use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;

/// Length of a TOTP time step in seconds
pub const TIME_STEP_SECS: i64 = 30;
/// Number of digits in a code
pub const CODE_DIGITS: usize = 6;
/// Random bytes in a generated secret (160 bits, the RFC 4226 recommendation)
pub const SECRET_BYTES: usize = 20;

const CODE_MODULUS: u32 = 1_000_000;

/// Time step counter for a unix timestamp: `floor(secs / 30)`.
pub fn time_step(unix_secs: i64) -> u64 {
    (unix_secs.max(0) / TIME_STEP_SECS) as u64
}

/// Time step counter for a wall-clock instant.
pub fn counter_at(now: DateTime<Utc>) -> u64 {
    time_step(now.timestamp())
}

/// Decode a base32 secret. Case, whitespace and `=` padding are ignored.
pub fn decode_secret(secret: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let normalized: Zeroizing<String> = Zeroizing::new(
        secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect(),
    );
    if normalized.is_empty() {
        return Err(CryptoError::InvalidSecret("secret is empty".to_string()));
    }

    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::InvalidSecret(e.to_string()))
}

/// Generate a random base32 secret for enrollment.
pub fn generate_secret() -> String {
    let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    BASE32_NOPAD.encode(bytes.as_slice())
}

/// HMAC-SHA1 one-time password generator for a single secret.
pub struct Hotp {
    key: Zeroizing<Vec<u8>>,
}

impl Hotp {
    pub fn new(key: impl Into<Vec<u8>>) -> CryptoResult<Self> {
        let key = Zeroizing::new(key.into());
        if key.is_empty() {
            return Err(CryptoError::InvalidSecret("secret is empty".to_string()));
        }
        Ok(Self { key })
    }

    pub fn from_base32(secret: &str) -> CryptoResult<Self> {
        let key = decode_secret(secret)?;
        Self::new(key.as_slice())
    }

    /// The code for `counter`, zero-padded to six digits.
    pub fn at(&self, counter: u64) -> CryptoResult<String> {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidSecret(e.to_string()))?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]) & 0x7fff_ffff;

        Ok(format!(
            "{:0width$}",
            binary % CODE_MODULUS,
            width = CODE_DIGITS
        ))
    }

    /// The code for the time step containing `now`.
    pub fn at_time(&self, now: DateTime<Utc>) -> CryptoResult<String> {
        self.at(counter_at(now))
    }

    /// Compare `code` against the code for `counter` in constant time.
    ///
    /// Only the exact counter is accepted; there is no skew window.
    pub fn verify(&self, code: &str, counter: u64) -> CryptoResult<bool> {
        let expected = Zeroizing::new(self.at(counter)?);
        Ok(code.len() == expected.len()
            && bool::from(code.as_bytes().ct_eq(expected.as_bytes())))
    }
}

impl std::fmt::Debug for Hotp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hotp").field("key", &"<redacted>").finish()
    }
}
