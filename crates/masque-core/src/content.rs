//! Anonymous posts, engagement and moderation
//!
//! Posts reference their author by [`PersonaId`] only. Expired and removed
//! posts are indistinguishable from missing ones for ordinary readers;
//! moderators see all of them through [`AnonymousContentStore::moderation_queue`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::MasqueError;
use crate::integrity::ContentIntegrityService;
use crate::sanitizer::MetadataSanitizer;
use crate::storage::{RetiredPost, Storage};
use crate::types::{
    AnonymousPost, Comment, CommentId, Engagement, FeedFilter, FeedPage, IntegrityStatus,
    LikeAction, ModerationState, ModeratorPostView, NewPost, Persona, PersonaId, PostId, PostType,
    PublicCommentView, PublicPostView, Removal, RemovalReason, Report, ReportSource,
    MAX_COMMENT_CHARS, MAX_LIFESPAN_HOURS, MAX_REPORT_REASON_CHARS,
};

const SECS_PER_HOUR: i64 = 3600;

pub struct AnonymousContentStore {
    storage: Storage,
    sanitizer: Arc<MetadataSanitizer>,
    clock: Arc<dyn Clock>,
}

impl AnonymousContentStore {
    pub fn new(storage: Storage, sanitizer: Arc<MetadataSanitizer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            sanitizer,
            clock,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Authoring
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a post for an active persona.
    ///
    /// The integrity record is sealed before anything is written. Without
    /// an explicit lifespan the persona's default applies; a lifespan of 0
    /// means the post never disappears.
    pub fn create_post(
        &self,
        persona_id: &PersonaId,
        post: NewPost,
    ) -> Result<PublicPostView, MasqueError> {
        post.validate()?;
        let persona = self.active_persona(persona_id)?;

        for path in &post.media {
            if !self.sanitizer.exists(path) {
                return Err(MasqueError::Validation(format!(
                    "media file {} was not uploaded",
                    path
                )));
            }
        }

        let created = self.clock.now();
        let now = created.timestamp();
        let content = post.content.filter(|c| !c.trim().is_empty());
        let lifespan = post
            .lifespan_hours
            .or(persona.default_content_lifespan_hours);
        let integrity = ContentIntegrityService::seal(
            content.as_deref(),
            &post.media,
            post.signing_key.as_ref().map(|key| key.as_str()),
            &persona,
        )?;
        drop(post.signing_key);

        let post = AnonymousPost {
            id: PostId::at(created),
            persona_id: persona.id,
            post_type: PostType::derive(content.as_deref(), &post.media),
            content,
            media: post.media,
            created_at: now,
            disappears_at: expiry(now, lifespan),
            engagement: Engagement::default(),
            integrity,
            moderation: ModerationState::default(),
        };
        self.storage.save_post(&post)?;

        info!(
            post_id = %post.id,
            persona_id = %post.persona_id,
            post_type = %post.post_type,
            signed = post.integrity.signature.is_some(),
            "Post created"
        );
        Ok(post.to_public_view(now))
    }

    /// Delete a post. Only its author persona may do this.
    ///
    /// Posts held for review (reported or failing integrity) are hidden
    /// instead of erased so moderators keep them. Removed posts are gone as
    /// far as the author is concerned.
    pub fn delete_post(&self, post_id: &PostId, persona_id: &PersonaId) -> Result<(), MasqueError> {
        let now = self.clock.timestamp();
        let retired = self.storage.retire_post(post_id, |post| {
            if post.persona_id != *persona_id {
                warn!(post_id = %post_id, persona_id = %persona_id, "Delete by non-author refused");
                return Err(MasqueError::NotAuthorized("post".to_string()));
            }
            if post.moderation.is_removed() {
                return Err(MasqueError::NotFound("post".to_string()));
            }
            Ok(post.needs_review() && post.hide_for_deleted_author(now))
        })?;

        match retired {
            Some(RetiredPost::Deleted(post)) => {
                self.remove_media(&post);
                info!(post_id = %post_id, "Post deleted");
                Ok(())
            }
            Some(RetiredPost::Kept(_)) => {
                info!(post_id = %post_id, "Post under review hidden instead of deleted");
                Ok(())
            }
            None => Err(MasqueError::NotFound("post".to_string())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Engagement
    // ═══════════════════════════════════════════════════════════════════════

    /// Like or unlike, atomically per post.
    pub fn toggle_like(
        &self,
        post_id: &PostId,
        persona_id: &PersonaId,
    ) -> Result<LikeAction, MasqueError> {
        self.active_persona(persona_id)?;
        let now = self.clock.timestamp();

        let action = self.storage.update_post_with(post_id, |post| {
            ensure_visible(post, now)?;
            if post.engagement.likes.remove(persona_id) {
                Ok(LikeAction::Unliked)
            } else {
                post.engagement.likes.insert(*persona_id);
                Ok(LikeAction::Liked)
            }
        })?;
        debug!(post_id = %post_id, ?action, "Like toggled");
        Ok(action)
    }

    /// Append a comment with its own optional lifespan.
    pub fn add_comment(
        &self,
        post_id: &PostId,
        persona_id: &PersonaId,
        content: &str,
        lifespan_hours: Option<u32>,
    ) -> Result<PublicCommentView, MasqueError> {
        let content = content.trim();
        let chars = content.chars().count();
        if chars == 0 || chars > MAX_COMMENT_CHARS {
            return Err(MasqueError::Validation(format!(
                "comment must be 1-{} characters",
                MAX_COMMENT_CHARS
            )));
        }
        if lifespan_hours.is_some_and(|h| h > MAX_LIFESPAN_HOURS) {
            return Err(MasqueError::Validation(format!(
                "lifespan may not exceed {} hours",
                MAX_LIFESPAN_HOURS
            )));
        }
        self.active_persona(persona_id)?;
        let created = self.clock.now();
        let now = created.timestamp();

        let comment = Comment {
            id: CommentId::at(created),
            persona_id: *persona_id,
            content: content.to_string(),
            created_at: now,
            disappears_at: expiry(now, lifespan_hours),
        };
        let view = comment.to_public_view();

        self.storage.update_post_with(post_id, |post| {
            ensure_visible(post, now)?;
            post.engagement.comments.push(comment);
            Ok(())
        })?;
        debug!(post_id = %post_id, "Comment added");
        Ok(view)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Newest-first page of visible posts.
    pub fn list_feed(&self, filter: &FeedFilter) -> Result<FeedPage, MasqueError> {
        filter.validate()?;
        let now = self.clock.timestamp();

        let visible: Vec<AnonymousPost> = self
            .storage
            .list_posts()?
            .into_iter()
            .filter(|post| post.is_visible(now) && filter.matches(post))
            .collect();

        let total = visible.len();
        let offset = filter.offset();
        let posts: Vec<PublicPostView> = visible
            .iter()
            .skip(offset)
            .take(filter.limit as usize)
            .map(|post| post.to_public_view(now))
            .collect();
        let has_more = offset.saturating_add(posts.len()) < total;

        Ok(FeedPage {
            posts,
            page: filter.page,
            limit: filter.limit,
            total,
            has_more,
        })
    }

    /// Single post, integrity rechecked on read.
    ///
    /// A failed check is persisted for moderators; readers still get the
    /// post without any integrity detail.
    pub fn get_post(&self, post_id: &PostId) -> Result<PublicPostView, MasqueError> {
        let now = self.clock.timestamp();
        let post = self
            .storage
            .load_post(post_id)?
            .filter(|post| post.is_visible(now))
            .ok_or_else(|| MasqueError::NotFound("post".to_string()))?;

        let author_key_hash = self
            .storage
            .load_persona(&post.persona_id)?
            .map(|persona| persona.crypto.public_key_hash);
        let status = ContentIntegrityService::verify(
            post.content.as_deref(),
            &post.media,
            &post.integrity,
            author_key_hash.as_deref(),
        );

        if status == IntegrityStatus::Failed && post.integrity.status != IntegrityStatus::Failed {
            warn!(post_id = %post_id, "Integrity check failed, flagging post");
            self.storage.update_post_with(post_id, |stored| {
                stored.integrity.status = IntegrityStatus::Failed;
                Ok(())
            })?;
        }

        Ok(post.to_public_view(now))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Moderation
    // ═══════════════════════════════════════════════════════════════════════

    /// File a report. Each reporter may report a post once.
    pub fn report_post(
        &self,
        post_id: &PostId,
        source: ReportSource,
        reason: &str,
    ) -> Result<(), MasqueError> {
        let reason = reason.trim();
        let chars = reason.chars().count();
        if chars == 0 || chars > MAX_REPORT_REASON_CHARS {
            return Err(MasqueError::Validation(format!(
                "report reason must be 1-{} characters",
                MAX_REPORT_REASON_CHARS
            )));
        }
        let now = self.clock.timestamp();

        self.storage.update_post_with(post_id, |post| {
            if post.is_expired(now) {
                return Err(MasqueError::NotFound("post".to_string()));
            }
            if post.moderation.has_reporter(&source) {
                return Err(MasqueError::Validation(
                    "post already reported by this reporter".to_string(),
                ));
            }
            post.moderation.reports.push(Report {
                source,
                reason: reason.to_string(),
                created_at: now,
            });
            Ok(())
        })?;
        info!(post_id = %post_id, "Post reported");
        Ok(())
    }

    /// Hide a post from readers. Kept for moderators.
    pub fn remove_post(&self, post_id: &PostId, note: &str) -> Result<ModeratorPostView, MasqueError> {
        let now = self.clock.timestamp();
        let post = self.storage.update_post_with(post_id, |post| {
            post.moderation.removal = Some(Removal {
                reason: RemovalReason::Moderation {
                    note: note.trim().to_string(),
                },
                removed_at: now,
            });
            Ok(post.clone())
        })?;
        info!(post_id = %post_id, "Post removed by moderator");
        Ok(post.to_moderator_view(now))
    }

    /// Undo a moderator removal. Author deletions cannot be restored.
    pub fn restore_post(&self, post_id: &PostId) -> Result<ModeratorPostView, MasqueError> {
        let now = self.clock.timestamp();
        let post = self.storage.update_post_with(post_id, |post| {
            match post.moderation.removal.as_ref().map(|r| &r.reason) {
                Some(RemovalReason::Moderation { .. }) => {
                    post.moderation.removal = None;
                    Ok(post.clone())
                }
                Some(RemovalReason::AuthorDeleted) => Err(MasqueError::Validation(
                    "author-deleted posts cannot be restored".to_string(),
                )),
                None => Err(MasqueError::Validation("post is not removed".to_string())),
            }
        })?;
        info!(post_id = %post_id, "Post restored");
        Ok(post.to_moderator_view(now))
    }

    /// Reported, removed and integrity-failed posts, newest first.
    pub fn moderation_queue(&self) -> Result<Vec<ModeratorPostView>, MasqueError> {
        let now = self.clock.timestamp();
        Ok(self
            .storage
            .list_posts()?
            .iter()
            .filter(|post| post.needs_review())
            .map(|post| post.to_moderator_view(now))
            .collect())
    }

    /// Hide every post of a deleted persona, keeping them for moderators.
    pub fn soft_delete_by_persona(&self, persona_id: &PersonaId) -> Result<usize, MasqueError> {
        let now = self.clock.timestamp();
        let hidden = self
            .storage
            .update_posts_by_persona(persona_id, |post| post.hide_for_deleted_author(now))?;
        info!(persona_id = %persona_id, hidden, "Persona posts hidden");
        Ok(hidden)
    }

    /// Hard-delete expired posts that are not held for moderation.
    pub fn purge_expired(&self) -> Result<usize, MasqueError> {
        let now = self.clock.timestamp();
        let purged = self
            .storage
            .purge_posts(|post| post.is_expired(now) && !post.needs_review())?;
        for post in &purged {
            self.remove_media(post);
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "Expired posts purged");
        }
        Ok(purged.len())
    }

    fn active_persona(&self, id: &PersonaId) -> Result<Persona, MasqueError> {
        self.storage
            .load_persona(id)?
            .filter(|persona| persona.is_active)
            .ok_or_else(|| MasqueError::NotFound("persona".to_string()))
    }

    fn remove_media(&self, post: &AnonymousPost) {
        for path in &post.media {
            if let Err(e) = self.sanitizer.remove(path) {
                warn!(post_id = %post.id, error = %e, "Failed to remove media file");
            }
        }
    }
}

fn ensure_visible(post: &AnonymousPost, now: i64) -> Result<(), MasqueError> {
    if post.is_visible(now) {
        Ok(())
    } else {
        Err(MasqueError::NotFound("post".to_string()))
    }
}

fn expiry(now: i64, lifespan_hours: Option<u32>) -> Option<i64> {
    lifespan_hours
        .filter(|hours| *hours > 0)
        .map(|hours| now + i64::from(hours) * SECS_PER_HOUR)
}
