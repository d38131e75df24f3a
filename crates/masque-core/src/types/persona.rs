//! Persona types
//!
//! A [`Persona`] carries two fields that must never reach a client: the
//! owning user id and the stealth salt. `Persona` therefore does not
//! implement `Serialize`; the only serializable projection is
//! [`PublicPersonaView`], built by [`Persona::to_public_view`].

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::MasqueError;
use crate::mixing::MixingParameters;
use crate::types::{PersonaId, UserId};

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Maximum display name length (characters)
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

/// Maximum avatar URL length
pub const MAX_AVATAR_URL_LEN: usize = 2048;

/// Maximum default content lifespan (one year)
pub const MAX_LIFESPAN_HOURS: u32 = 24 * 365;

/// Secret salt keying a persona's stealth address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn generate() -> Result<Self, MasqueError> {
        Ok(Self(crypto::random_array::<SALT_LEN>()?))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    pub(crate) fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt([redacted])")
    }
}

/// Refreshable address derived from a persona's public key hash and salt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthAddress(pub(crate) String);

impl StealthAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StealthAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cryptographic material of a persona
#[derive(Clone, PartialEq)]
pub struct CryptoMaterial {
    /// Hex SHA-256 of the persona's Ed25519 public key
    pub public_key_hash: String,
    /// Current stealth address
    pub stealth_address: StealthAddress,
    /// Keys the stealth address; never leaves the core
    pub(crate) salt: Salt,
    /// Transport mixing configuration
    pub mixing: MixingParameters,
}

impl std::fmt::Debug for CryptoMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoMaterial")
            .field("public_key_hash", &self.public_key_hash)
            .field("stealth_address", &self.stealth_address)
            .field("mixing", &self.mixing)
            .finish_non_exhaustive()
    }
}

/// Per-persona session behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Idle minutes before the anonymous session ends (0 disables)
    pub auto_timeout_minutes: u32,
    /// Discard fingerprint state on logout
    pub purge_on_logout: bool,
    /// Flag fingerprint changes within a session
    pub notify_on_suspicious_activity: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            auto_timeout_minutes: 30,
            purge_on_logout: true,
            notify_on_suspicious_activity: true,
        }
    }
}

/// One unlinkable identity owned by exactly one verified user.
#[derive(Clone, PartialEq)]
pub struct Persona {
    pub id: PersonaId,
    pub(crate) owner: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub crypto: CryptoMaterial,
    pub is_active: bool,
    /// Applied to new posts that do not choose their own lifespan
    pub default_content_lifespan_hours: Option<u32>,
    pub security: SecuritySettings,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_switched_at: Option<i64>,
}

impl Persona {
    /// A fresh, active persona with a random id.
    pub(crate) fn new(
        owner: UserId,
        display_name: String,
        crypto: CryptoMaterial,
        now: i64,
    ) -> Result<Self, MasqueError> {
        Ok(Self {
            id: PersonaId::generate()?,
            owner,
            display_name,
            avatar_url: None,
            crypto,
            is_active: true,
            default_content_lifespan_hours: None,
            security: SecuritySettings::default(),
            created_at: now,
            updated_at: now,
            last_switched_at: None,
        })
    }

    pub fn owned_by(&self, user: &UserId) -> bool {
        self.owner == *user
    }

    /// Project onto the client-safe view.
    pub fn to_public_view(&self) -> PublicPersonaView {
        PublicPersonaView {
            persona_id: self.id.to_base58(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            public_key_hash: self.crypto.public_key_hash.clone(),
            stealth_address: self.crypto.stealth_address.0.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persona")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("crypto", &self.crypto)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// The public subset of a persona. Never contains the owner or the salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicPersonaView {
    pub persona_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub public_key_hash: String,
    pub stealth_address: String,
    pub is_active: bool,
    pub created_at: i64,
}

/// Owner-requested changes to a persona
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaUpdate {
    pub display_name: Option<String>,
    /// `Some("")` clears the avatar
    pub avatar_url: Option<String>,
    /// `Some(0)` clears the default lifespan
    pub default_content_lifespan_hours: Option<u32>,
    pub security: Option<SecuritySettings>,
}

impl PersonaUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.avatar_url.is_none()
            && self.default_content_lifespan_hours.is_none()
            && self.security.is_none()
    }

    pub fn validate(&self) -> Result<(), MasqueError> {
        if self.is_empty() {
            return Err(MasqueError::Validation("nothing to update".to_string()));
        }
        if let Some(name) = &self.display_name {
            let trimmed = name.trim();
            if trimmed.is_empty() || trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(MasqueError::Validation(format!(
                    "display name must be 1-{} characters",
                    MAX_DISPLAY_NAME_LEN
                )));
            }
        }
        if let Some(url) = &self.avatar_url {
            if !url.is_empty()
                && (!url.starts_with("https://") || url.len() > MAX_AVATAR_URL_LEN)
            {
                return Err(MasqueError::Validation(
                    "avatar URL must be an https URL".to_string(),
                ));
            }
        }
        if let Some(hours) = self.default_content_lifespan_hours {
            if hours > MAX_LIFESPAN_HOURS {
                return Err(MasqueError::Validation(format!(
                    "lifespan may not exceed {} hours",
                    MAX_LIFESPAN_HOURS
                )));
            }
        }
        Ok(())
    }

    /// Apply to a persona, returning the updated value.
    pub fn apply(&self, persona: &Persona, now: i64) -> Persona {
        let mut updated = persona.clone();
        if let Some(name) = &self.display_name {
            updated.display_name = name.trim().to_string();
        }
        if let Some(url) = &self.avatar_url {
            updated.avatar_url = (!url.is_empty()).then(|| url.clone());
        }
        if let Some(hours) = self.default_content_lifespan_hours {
            updated.default_content_lifespan_hours = (hours > 0).then_some(hours);
        }
        if let Some(security) = self.security {
            updated.security = security;
        }
        updated.updated_at = now;
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_persona() -> Persona {
        Persona {
            id: PersonaId::generate().unwrap(),
            owner: UserId::new("owner-7f3a"),
            display_name: "QuietFalcon1234".to_string(),
            avatar_url: None,
            crypto: CryptoMaterial {
                public_key_hash: "ab".repeat(32),
                stealth_address: StealthAddress("cd".repeat(32)),
                salt: Salt::generate().unwrap(),
                mixing: MixingParameters::direct(),
            },
            is_active: true,
            default_content_lifespan_hours: None,
            security: SecuritySettings::default(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            last_switched_at: None,
        }
    }

    #[test]
    fn test_public_view_omits_owner_and_salt() {
        let persona = sample_persona();
        let json = serde_json::to_string(&persona.to_public_view()).unwrap();
        assert!(!json.contains("owner-7f3a"));
        assert!(!json.contains(&persona.crypto.salt.to_hex()));
        assert!(!json.contains("owner"));
        assert!(!json.contains("salt"));
    }

    #[test]
    fn test_debug_omits_owner_and_salt() {
        let persona = sample_persona();
        let debug = format!("{:?}", persona);
        assert!(!debug.contains("owner-7f3a"));
        assert!(!debug.contains(&persona.crypto.salt.to_hex()));
    }

    #[test]
    fn test_update_validation() {
        let empty = PersonaUpdate::default();
        assert!(empty.validate().is_err());

        let long_name = PersonaUpdate {
            display_name: Some("x".repeat(51)),
            ..Default::default()
        };
        assert!(long_name.validate().is_err());

        let http_avatar = PersonaUpdate {
            avatar_url: Some("http://example.com/a.png".to_string()),
            ..Default::default()
        };
        assert!(http_avatar.validate().is_err());

        let ok = PersonaUpdate {
            display_name: Some("  Night Owl  ".to_string()),
            avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_update_apply_is_pure() {
        let persona = sample_persona();
        let update = PersonaUpdate {
            display_name: Some("  Night Owl ".to_string()),
            default_content_lifespan_hours: Some(12),
            ..Default::default()
        };

        let updated = update.apply(&persona, 1_700_000_100);
        assert_eq!(updated.display_name, "Night Owl");
        assert_eq!(updated.default_content_lifespan_hours, Some(12));
        assert_eq!(updated.updated_at, 1_700_000_100);
        assert_eq!(persona.display_name, "QuietFalcon1234");

        let cleared = PersonaUpdate {
            default_content_lifespan_hours: Some(0),
            avatar_url: Some(String::new()),
            ..Default::default()
        }
        .apply(&updated, 1_700_000_200);
        assert_eq!(cleared.default_content_lifespan_hours, None);
        assert_eq!(cleared.avatar_url, None);
    }
}
