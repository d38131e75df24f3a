//! Core types for Masque

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::crypto;
use crate::error::MasqueError;

mod persona;
mod post;
mod user;

pub use persona::{
    CryptoMaterial, Persona, PersonaUpdate, PublicPersonaView, Salt, SecuritySettings,
    StealthAddress, MAX_AVATAR_URL_LEN, MAX_DISPLAY_NAME_LEN, MAX_LIFESPAN_HOURS,
};
pub use post::{
    AnonymousPost, Comment, Engagement, FeedFilter, FeedPage, IntegrityRecord, IntegrityStatus,
    LikeAction, MediaPath, ModerationState, ModeratorPostView, NewPost, PostType,
    PublicCommentView, PublicPostView, Removal, RemovalReason, Report, ReportSource,
    DEFAULT_FEED_LIMIT, MAX_COMMENT_CHARS, MAX_CONTENT_CHARS, MAX_EXTENSION_LEN, MAX_FEED_LIMIT,
    MAX_MEDIA_PER_POST, MAX_REPORT_REASON_CHARS,
};
pub use user::{UserId, VerificationStatus};

/// Number of random bytes in a persona id (128 bits)
pub const PERSONA_ID_LEN: usize = 16;

/// Opaque persona identifier.
///
/// Drawn from the CSPRNG, never derived from anything about the owner.
/// This is the only reference to a persona that leaves the core.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonaId(pub [u8; PERSONA_ID_LEN]);

impl PersonaId {
    /// Create a new random PersonaId
    pub fn generate() -> Result<Self, MasqueError> {
        Ok(Self(crypto::random_array::<PERSONA_ID_LEN>()?))
    }

    pub fn from_bytes(bytes: [u8; PERSONA_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PERSONA_ID_LEN] {
        &self.0
    }

    /// Convert to base58 string for display/storage
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse from base58 string
    pub fn from_base58(s: &str) -> Result<Self, MasqueError> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|_| MasqueError::NotFound("persona".to_string()))?;
        let arr: [u8; PERSONA_ID_LEN] = bytes
            .try_into()
            .map_err(|_| MasqueError::NotFound("persona".to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl std::fmt::Debug for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PersonaId({})", self.to_base58())
    }
}

impl std::str::FromStr for PersonaId {
    type Err = MasqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

/// Unique identifier for a post
///
/// Uses ULID for time-ordered unique identifiers that sort lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub Ulid);

impl PostId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Id whose time component is `at`, so ordering follows the engine clock
    pub fn at(at: DateTime<Utc>) -> Self {
        Self(Ulid::from_datetime(at.into()))
    }

    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    pub fn to_string_repr(&self) -> String {
        self.0.to_string()
    }

    pub fn from_string(s: &str) -> Result<Self, MasqueError> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| MasqueError::NotFound("post".to_string()))
    }
}

impl Default for PostId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub Ulid);

impl CommentId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        Self(Ulid::from_datetime(at.into()))
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
