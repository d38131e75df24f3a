//! Professional user reference (external, read-only)

use serde::{Deserialize, Serialize};

/// Opaque professional user id.
///
/// Only ever travels inside the core. `Debug` is redacted so it cannot slip
/// into a log line through `{:?}`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserId([redacted])")
    }
}

/// Verification state of a professional account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Expired,
    Rejected,
}

impl VerificationStatus {
    /// Only verified users may own personas
    pub fn may_own_personas(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unverified" => Ok(Self::Unverified),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "expired" => Ok(Self::Expired),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!(
                "Invalid status '{}'. Must be one of: unverified, pending, verified, expired, rejected",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_verified_may_own() {
        assert!(VerificationStatus::Verified.may_own_personas());
        for status in [
            VerificationStatus::Unverified,
            VerificationStatus::Pending,
            VerificationStatus::Expired,
            VerificationStatus::Rejected,
        ] {
            assert!(!status.may_own_personas());
        }
    }

    #[test]
    fn test_status_parse_roundtrip() {
        let status: VerificationStatus = "Verified".parse().unwrap();
        assert_eq!(status, VerificationStatus::Verified);
        assert_eq!(status.to_string(), "verified");
        assert!("banana".parse::<VerificationStatus>().is_err());
    }

    #[test]
    fn test_user_id_debug_redacted() {
        let id = UserId::new("alice@example.com");
        assert!(!format!("{:?}", id).contains("alice"));
    }
}
