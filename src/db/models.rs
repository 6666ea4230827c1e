use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Access category; selects the default secret lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Long-lived: permanent staff
    #[serde(alias = "long_lived")]
    Permanent,
    /// Short-lived: visitors
    #[serde(alias = "short_lived")]
    Guest,
    /// Medium-lived: business trips
    #[serde(alias = "medium_lived")]
    BusinessTrip,
    /// Anything unrecognized
    #[serde(other)]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Guest => "guest",
            Self::BusinessTrip => "business_trip",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "permanent" | "long_lived" => Self::Permanent,
            "guest" | "short_lived" => Self::Guest,
            "business_trip" | "medium_lived" => Self::BusinessTrip,
            _ => Self::Other,
        }
    }

    /// Default secret lifetime for this category
    pub fn secret_lifetime(&self) -> Duration {
        match self {
            Self::Permanent => Duration::days(365),
            Self::Guest => Duration::days(7),
            Self::BusinessTrip | Self::Other => Duration::days(30),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Identity record as stored.
///
/// `secret` is the envelope-encrypted OTP secret; `None` means the identity
/// is unprovisioned and must never be granted access.
#[derive(Clone, FromRow)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub category: String,
    pub secret: Option<Vec<u8>>,
    pub secret_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn category(&self) -> Category {
        Category::parse(&self.category)
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.secret_expires_at.is_some_and(|expires| now > expires)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("has_secret", &self.has_secret())
            .field("secret_expires_at", &self.secret_expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// New identity for insertion
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub category: Category,
    pub secret_expires_at: Option<DateTime<Utc>>,
}

/// Public view of an identity. Never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub id: String,
    pub username: String,
    pub category: Category,
    pub secret_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub has_secret: bool,
}

impl From<&Identity> for IdentityDescriptor {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            username: identity.name.clone(),
            category: identity.category(),
            secret_expires_at: identity.secret_expires_at,
            created_at: identity.created_at,
            has_secret: identity.has_secret(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_lifetimes() {
        assert_eq!(Category::Permanent.secret_lifetime(), Duration::days(365));
        assert_eq!(Category::Guest.secret_lifetime(), Duration::days(7));
        assert_eq!(Category::BusinessTrip.secret_lifetime(), Duration::days(30));
        assert_eq!(Category::Other.secret_lifetime(), Duration::days(30));
    }

    #[test]
    fn test_category_parse_and_serde() {
        assert_eq!(Category::parse("short-lived"), Category::Guest);
        assert_eq!(Category::parse("PERMANENT"), Category::Permanent);
        assert_eq!(Category::parse("contractor"), Category::Other);

        let c: Category = serde_json::from_str("\"business_trip\"").unwrap();
        assert_eq!(c, Category::BusinessTrip);
        let c: Category = serde_json::from_str("\"long_lived\"").unwrap();
        assert_eq!(c, Category::Permanent);
        let c: Category = serde_json::from_str("\"intern\"").unwrap();
        assert_eq!(c, Category::Other);
        assert_eq!(serde_json::to_string(&Category::Guest).unwrap(), "\"guest\"");
    }

    #[test]
    fn test_expiry_and_debug() {
        let now = Utc::now();
        let identity = Identity {
            id: "id".to_string(),
            name: "alice".to_string(),
            category: "guest".to_string(),
            secret: Some(vec![1, 2, 3]),
            secret_expires_at: Some(now - Duration::seconds(1)),
            created_at: now,
        };
        assert!(identity.is_expired_at(now));
        assert!(!identity.is_expired_at(now - Duration::seconds(2)));
        assert!(!format!("{:?}", identity).contains("[1, 2, 3]"));

        let descriptor = IdentityDescriptor::from(&identity);
        assert_eq!(descriptor.category, Category::Guest);
        assert!(descriptor.has_secret);
    }
}
