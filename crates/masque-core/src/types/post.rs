//! Anonymous post types
//!
//! Posts are keyed by [`PersonaId`] only. Nothing here can hold a
//! professional user id: moderation reports filed from the professional
//! side carry a keyed digest instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::MasqueError;
use crate::identity::{ContentSignature, PersonaPublicKey};
use crate::types::persona::MAX_LIFESPAN_HOURS;
use crate::types::{CommentId, PersonaId, PostId};

/// Maximum post body length (characters)
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Maximum media attachments per post
pub const MAX_MEDIA_PER_POST: usize = 10;

/// Maximum comment length (characters)
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Default feed page size
pub const DEFAULT_FEED_LIMIT: u32 = 20;

/// Maximum feed page size
pub const MAX_FEED_LIMIT: u32 = 100;

/// Maximum report reason length (characters)
pub const MAX_REPORT_REASON_CHARS: usize = 500;

const MEDIA_STEM_LEN: usize = 32;
/// Maximum stored media extension length
pub const MAX_EXTENSION_LEN: usize = 16;
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v"];

/// Reference to a sanitized media file.
///
/// The only accepted shape is 32 lowercase hex characters, optionally
/// followed by a dot and a lowercase alphanumeric extension. Anything else
/// (paths, separators, original client names) is refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaPath(String);

impl MediaPath {
    pub fn parse(name: &str) -> Result<Self, MasqueError> {
        let invalid = || MasqueError::Validation(format!("invalid media reference: {}", name));

        let (stem, extension) = match name.split_once('.') {
            Some((stem, extension)) => (stem, Some(extension)),
            None => (name, None),
        };
        let stem_ok = stem.len() == MEDIA_STEM_LEN
            && stem
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        let extension_ok = extension.map_or(true, |ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        });

        if stem_ok && extension_ok {
            Ok(Self(name.to_string()))
        } else {
            Err(invalid())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn extension(&self) -> &str {
        self.0.split_once('.').map(|(_, ext)| ext).unwrap_or_default()
    }

    pub fn is_video(&self) -> bool {
        VIDEO_EXTENSIONS.contains(&self.extension())
    }
}

impl TryFrom<String> for MediaPath {
    type Error = MasqueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MediaPath> for String {
    fn from(path: MediaPath) -> Self {
        path.0
    }
}

impl std::fmt::Display for MediaPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of post, derived from its content and media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Text,
    Image,
    Video,
    Mixed,
}

impl PostType {
    pub fn derive(content: Option<&str>, media: &[MediaPath]) -> Self {
        let has_text = content.is_some_and(|c| !c.trim().is_empty());
        match (has_text, media.is_empty()) {
            (_, true) => Self::Text,
            (true, false) => Self::Mixed,
            (false, false) if media.iter().all(MediaPath::is_video) => Self::Video,
            (false, false) => Self::Image,
        }
    }
}

impl std::fmt::Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Mixed => "mixed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "mixed" => Ok(Self::Mixed),
            other => Err(format!(
                "Invalid post type '{}'. Must be one of: text, image, video, mixed",
                other
            )),
        }
    }
}

/// A comment on a post. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub persona_id: PersonaId,
    pub content: String,
    pub created_at: i64,
    pub disappears_at: Option<i64>,
}

impl Comment {
    pub fn is_expired(&self, now: i64) -> bool {
        self.disappears_at.is_some_and(|at| at <= now)
    }

    pub fn to_public_view(&self) -> PublicCommentView {
        PublicCommentView {
            comment_id: self.id.to_string(),
            persona_id: self.persona_id.to_base58(),
            content: self.content.clone(),
            created_at: self.created_at,
            disappears_at: self.disappears_at,
        }
    }
}

/// Likes and comments on a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: BTreeSet<PersonaId>,
    pub comments: Vec<Comment>,
}

/// Result of toggling a like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeAction {
    Liked,
    Unliked,
}

/// Outcome of the last integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    /// Hash recorded, no signature supplied
    Unverified,
    Verified,
    Failed,
}

/// Content hash and optional signature, sealed at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityRecord {
    pub content_hash: String,
    pub signature: Option<ContentSignature>,
    pub signer_public_key: Option<PersonaPublicKey>,
    pub status: IntegrityStatus,
}

/// Who filed a report.
///
/// Professional reporters are recorded as a keyed digest of their user id
/// so the report can be deduplicated without storing the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    Professional { reporter_digest: String },
    Anonymous { reporter: PersonaId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub source: ReportSource,
    pub reason: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Moderation { note: String },
    AuthorDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removal {
    pub reason: RemovalReason,
    pub removed_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationState {
    pub reports: Vec<Report>,
    pub removal: Option<Removal>,
}

impl ModerationState {
    pub fn is_removed(&self) -> bool {
        self.removal.is_some()
    }

    pub fn has_reporter(&self, source: &ReportSource) -> bool {
        self.reports.iter().any(|r| r.source == *source)
    }
}

/// A post authored by a persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousPost {
    pub id: PostId,
    pub persona_id: PersonaId,
    pub content: Option<String>,
    pub media: Vec<MediaPath>,
    pub post_type: PostType,
    pub created_at: i64,
    pub disappears_at: Option<i64>,
    pub engagement: Engagement,
    pub integrity: IntegrityRecord,
    pub moderation: ModerationState,
}

impl AnonymousPost {
    pub fn is_expired(&self, now: i64) -> bool {
        self.disappears_at.is_some_and(|at| at <= now)
    }

    /// Visible to normal reads: neither expired nor removed.
    pub fn is_visible(&self, now: i64) -> bool {
        !self.is_expired(now) && !self.moderation.is_removed()
    }

    /// Reported, removed or failed its integrity check
    pub fn needs_review(&self) -> bool {
        !self.moderation.reports.is_empty()
            || self.moderation.is_removed()
            || self.integrity.status == IntegrityStatus::Failed
    }

    /// Hide the post because its author was deleted. Posts already removed
    /// keep their original removal.
    pub(crate) fn hide_for_deleted_author(&mut self, now: i64) -> bool {
        if self.moderation.is_removed() {
            return false;
        }
        self.moderation.removal = Some(Removal {
            reason: RemovalReason::AuthorDeleted,
            removed_at: now,
        });
        true
    }

    /// Client view; expired comments are dropped.
    pub fn to_public_view(&self, now: i64) -> PublicPostView {
        PublicPostView {
            post_id: self.id.to_string_repr(),
            persona_id: self.persona_id.to_base58(),
            content: self.content.clone(),
            media: self.media.iter().map(|m| m.as_str().to_string()).collect(),
            post_type: self.post_type,
            created_at: self.created_at,
            disappears_at: self.disappears_at,
            like_count: self.engagement.likes.len(),
            comments: self
                .engagement
                .comments
                .iter()
                .filter(|c| !c.is_expired(now))
                .map(Comment::to_public_view)
                .collect(),
        }
    }

    pub fn to_moderator_view(&self, now: i64) -> ModeratorPostView {
        let integrity_error = (self.integrity.status == IntegrityStatus::Failed).then(|| {
            MasqueError::IntegrityFailure(format!("post {} failed verification", self.id))
                .to_string()
        });
        ModeratorPostView {
            post: self.to_public_view(now),
            expired: self.is_expired(now),
            integrity: self.integrity.clone(),
            integrity_error,
            reports: self.moderation.reports.clone(),
            removal: self.moderation.removal.clone(),
        }
    }
}

/// Input for creating a post
#[derive(Default)]
pub struct NewPost {
    pub content: Option<String>,
    pub media: Vec<MediaPath>,
    /// Overrides the persona's default lifespan; `Some(0)` means never
    pub lifespan_hours: Option<u32>,
    /// Client-held persona private key (hex); used once to sign
    pub signing_key: Option<Zeroizing<String>>,
}

impl NewPost {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), MasqueError> {
        let content = self.content.as_deref().filter(|c| !c.trim().is_empty());
        if content.is_none() && self.media.is_empty() {
            return Err(MasqueError::Validation(
                "post needs content or at least one media file".to_string(),
            ));
        }
        if content.is_some_and(|c| c.chars().count() > MAX_CONTENT_CHARS) {
            return Err(MasqueError::Validation(format!(
                "content may not exceed {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        if self.media.len() > MAX_MEDIA_PER_POST {
            return Err(MasqueError::Validation(format!(
                "at most {} media files per post",
                MAX_MEDIA_PER_POST
            )));
        }
        if self.lifespan_hours.is_some_and(|h| h > MAX_LIFESPAN_HOURS) {
            return Err(MasqueError::Validation(format!(
                "lifespan may not exceed {} hours",
                MAX_LIFESPAN_HOURS
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for NewPost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewPost")
            .field("content_len", &self.content.as_ref().map(|c| c.len()))
            .field("media", &self.media)
            .field("lifespan_hours", &self.lifespan_hours)
            .field("signed", &self.signing_key.is_some())
            .finish()
    }
}

/// Feed query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub persona_id: Option<PersonaId>,
    pub post_type: Option<PostType>,
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self {
            persona_id: None,
            post_type: None,
            page: 1,
            limit: DEFAULT_FEED_LIMIT,
        }
    }
}

impl FeedFilter {
    pub fn validate(&self) -> Result<(), MasqueError> {
        if self.page == 0 {
            return Err(MasqueError::Validation("page starts at 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_FEED_LIMIT {
            return Err(MasqueError::Validation(format!(
                "limit must be 1-{}",
                MAX_FEED_LIMIT
            )));
        }
        Ok(())
    }

    pub fn matches(&self, post: &AnonymousPost) -> bool {
        self.persona_id.map_or(true, |id| post.persona_id == id)
            && self.post_type.map_or(true, |t| post.post_type == t)
    }

    pub(crate) fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.limit as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub posts: Vec<PublicPostView>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicCommentView {
    pub comment_id: String,
    pub persona_id: String,
    pub content: String,
    pub created_at: i64,
    pub disappears_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicPostView {
    pub post_id: String,
    pub persona_id: String,
    pub content: Option<String>,
    pub media: Vec<String>,
    pub post_type: PostType,
    pub created_at: i64,
    pub disappears_at: Option<i64>,
    pub like_count: usize,
    pub comments: Vec<PublicCommentView>,
}

/// Moderator-only view including integrity and moderation data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorPostView {
    pub post: PublicPostView,
    pub expired: bool,
    pub integrity: IntegrityRecord,
    pub integrity_error: Option<String>,
    pub reports: Vec<Report>,
    pub removal: Option<Removal>,
}
