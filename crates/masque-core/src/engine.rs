//! MasqueEngine - the async entry point of the anonymous-persona core
//!
//! The engine owns every service and exposes one async method per request
//! type. Each call runs its storage and crypto work on the blocking pool,
//! bounded by `operation_timeout`.
//!
//! # Example
//!
//! ```ignore
//! use masque_core::{MasqueConfig, MasqueEngine, NewPost, UserId, VerificationStatus};
//!
//! let engine = MasqueEngine::new("~/.masque", MasqueConfig::from_env()?).await?;
//! let alice = UserId::new("alice");
//! engine.set_verification_status(&alice, VerificationStatus::Verified).await?;
//!
//! let created = engine.create_persona(&alice).await?;
//! let ctx = engine.authenticate(&created.session.token, "cli").await?;
//! engine.create_post(&ctx, NewPost::text("hello"), Vec::new()).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MasqueConfig;
use crate::content::AnonymousContentStore;
use crate::directory::{ProfessionalDirectory, StorageDirectory};
use crate::error::MasqueError;
use crate::gateway::{
    AnonymousContext, Gateway, ProfessionalAuthenticator, RequestContext, RequestHeaders,
    TrustedHeaderAuthenticator,
};
use crate::identity::PrivateIdentity;
use crate::mixing::{RoutePlan, TrafficMixingPlanner};
use crate::persona_store::PersonaStore;
use crate::sanitizer::{MetadataSanitizer, SanitizedUpload};
use crate::session::{FingerprintInputs, IssuedSession, SessionIsolationLayer, SessionState};
use crate::storage::Storage;
use crate::types::{
    FeedFilter, FeedPage, LikeAction, MediaPath, ModeratorPostView, NewPost, PersonaId,
    PersonaUpdate, PostId, PublicCommentView, PublicPersonaView, PublicPostView, ReportSource,
    UserId, VerificationStatus, MAX_MEDIA_PER_POST,
};

const DB_FILE: &str = "masque.redb";

/// Optional collaborators; anything left `None` gets the local default.
#[derive(Default)]
pub struct EngineOptions {
    pub directory: Option<Arc<dyn ProfessionalDirectory>>,
    pub clock: Option<Arc<dyn Clock>>,
    pub authenticator: Option<Arc<dyn ProfessionalAuthenticator>>,
}

/// A raw upload as received from the client
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Result of creating a persona.
///
/// `private_identity` exists only here; hand it to the client and drop it.
#[derive(Debug)]
pub struct NewPersona {
    pub persona: PublicPersonaView,
    pub private_identity: PrivateIdentity,
    pub session: IssuedSession,
}

/// Result of switching into a persona
#[derive(Debug, Clone)]
pub struct SwitchedPersona {
    pub persona: PublicPersonaView,
    pub session: IssuedSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaDeletion {
    pub persona_id: PersonaId,
    /// Posts hidden by the cascade
    pub hidden_posts: usize,
}

struct Services {
    config: Arc<MasqueConfig>,
    clock: Arc<dyn Clock>,
    storage: Storage,
    personas: Arc<PersonaStore>,
    sessions: Arc<SessionIsolationLayer>,
    sanitizer: Arc<MetadataSanitizer>,
    content: AnonymousContentStore,
    gateway: Gateway,
}

impl Services {
    fn create_post_with_uploads(
        &self,
        persona_id: &PersonaId,
        mut post: NewPost,
        uploads: &[Upload],
    ) -> Result<PublicPostView, MasqueError> {
        if post.media.len() + uploads.len() > MAX_MEDIA_PER_POST {
            return Err(MasqueError::Validation(format!(
                "at most {} media files per post",
                MAX_MEDIA_PER_POST
            )));
        }

        let mut written: Vec<MediaPath> = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.sanitizer.sanitize(&upload.name, &upload.bytes) {
                Ok(stored) => written.push(stored.path),
                Err(e) => {
                    self.discard(&written);
                    return Err(e);
                }
            }
        }

        post.media.extend(written.iter().cloned());
        match self.content.create_post(persona_id, post) {
            Ok(view) => Ok(view),
            Err(e) => {
                self.discard(&written);
                Err(e)
            }
        }
    }

    fn discard(&self, written: &[MediaPath]) {
        for path in written {
            if let Err(e) = self.sanitizer.remove(path) {
                warn!(media = %path, error = %e, "Failed to clean up upload");
            }
        }
    }
}

/// Main entry point of the anonymous-persona core
///
/// Cheap to clone; clones share every service.
#[derive(Clone)]
pub struct MasqueEngine {
    services: Arc<Services>,
    data_dir: PathBuf,
}

impl MasqueEngine {
    /// Open the engine with the local defaults: the `users` table as the
    /// professional directory, wall-clock time and the trusted-header
    /// professional authenticator.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid, `Io`/`Database` if the
    /// data directory or database cannot be opened.
    pub async fn new(data_dir: impl AsRef<Path>, config: MasqueConfig) -> Result<Self, MasqueError> {
        Self::with_options(data_dir, config, EngineOptions::default()).await
    }

    pub async fn with_options(
        data_dir: impl AsRef<Path>,
        config: MasqueConfig,
        options: EngineOptions,
    ) -> Result<Self, MasqueError> {
        config.validate()?;
        let data_dir = data_dir.as_ref().to_path_buf();
        info!(?data_dir, "Initializing MasqueEngine");

        let open_dir = data_dir.clone();
        let storage = tokio::task::spawn_blocking(move || -> Result<Storage, MasqueError> {
            std::fs::create_dir_all(&open_dir)?;
            Storage::new(open_dir.join(DB_FILE))
        })
        .await
        .map_err(|e| MasqueError::Io(std::io::Error::other(e)))??;

        let upload_dir = if config.upload_dir.is_absolute() {
            config.upload_dir.clone()
        } else {
            data_dir.join(&config.upload_dir)
        };
        let sanitizer = Arc::new(MetadataSanitizer::new(upload_dir)?);

        let config = Arc::new(config);
        let clock = options.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let directory = options
            .directory
            .unwrap_or_else(|| Arc::new(StorageDirectory::new(storage.clone())) as Arc<dyn ProfessionalDirectory>);
        let authenticator = options
            .authenticator
            .unwrap_or_else(|| Arc::new(TrustedHeaderAuthenticator) as Arc<dyn ProfessionalAuthenticator>);

        let personas = Arc::new(PersonaStore::new(
            storage.clone(),
            directory,
            config.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionIsolationLayer::new(config.clone()));
        let content = AnonymousContentStore::new(storage.clone(), sanitizer.clone(), clock.clone());
        let gateway = Gateway::new(
            sessions.clone(),
            personas.clone(),
            authenticator,
            clock.clone(),
        );

        Ok(Self {
            services: Arc::new(Services {
                config,
                clock,
                storage,
                personas,
                sessions,
                sanitizer,
                content,
                gateway,
            }),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &MasqueConfig {
        &self.services.config
    }

    /// Run `op` on the blocking pool under the operation timeout.
    async fn run<T, F>(&self, operation: &'static str, op: F) -> Result<T, MasqueError>
    where
        T: Send + 'static,
        F: FnOnce(&Services) -> Result<T, MasqueError> + Send + 'static,
    {
        let services = self.services.clone();
        let task = tokio::task::spawn_blocking(move || op(&services));

        match tokio::time::timeout(self.services.config.operation_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(MasqueError::Io(std::io::Error::other(join_error))),
            Err(_) => {
                warn!(operation, "Operation timed out");
                Err(MasqueError::Timeout(operation.to_string()))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Request Context
    // ═══════════════════════════════════════════════════════════════════════

    /// Authenticate a request from its headers.
    pub async fn resolve(&self, headers: RequestHeaders) -> Result<RequestContext, MasqueError> {
        self.run("resolve", move |s| s.gateway.resolve(&headers)).await
    }

    /// Anonymous-path authentication from a bare token.
    pub async fn authenticate(
        &self,
        token: &str,
        user_agent: &str,
    ) -> Result<AnonymousContext, MasqueError> {
        let token = token.to_string();
        let inputs = FingerprintInputs {
            user_agent: user_agent.to_string(),
        };
        self.run("authenticate", move |s| s.gateway.anonymous(&token, &inputs))
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Professional Side
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a user's professional verification state in the local
    /// directory.
    pub async fn set_verification_status(
        &self,
        user: &UserId,
        status: VerificationStatus,
    ) -> Result<(), MasqueError> {
        let user = user.clone();
        self.run("set_verification_status", move |s| {
            s.storage.save_user_status(&user, status)
        })
        .await
    }

    /// Mint a persona and open its first anonymous session.
    pub async fn create_persona(&self, owner: &UserId) -> Result<NewPersona, MasqueError> {
        let owner = owner.clone();
        self.run("create_persona", move |s| {
            let (persona, private_identity) = s.personas.create(&owner)?;
            let session = s.sessions.issue(&persona, s.clock.timestamp())?;
            Ok(NewPersona {
                persona: persona.to_public_view(),
                private_identity,
                session,
            })
        })
        .await
    }

    pub async fn my_personas(&self, owner: &UserId) -> Result<Vec<PublicPersonaView>, MasqueError> {
        let owner = owner.clone();
        self.run("my_personas", move |s| s.personas.personas_for_owner(&owner))
            .await
    }

    pub async fn update_persona(
        &self,
        owner: &UserId,
        persona_id: PersonaId,
        update: PersonaUpdate,
    ) -> Result<PublicPersonaView, MasqueError> {
        let owner = owner.clone();
        self.run("update_persona", move |s| {
            s.personas.update_persona(&persona_id, &owner, &update)
        })
        .await
    }

    /// Deactivating a persona also ends its session.
    pub async fn set_persona_active(
        &self,
        owner: &UserId,
        persona_id: PersonaId,
        active: bool,
    ) -> Result<PublicPersonaView, MasqueError> {
        let owner = owner.clone();
        self.run("set_persona_active", move |s| {
            let view = s.personas.set_active(&persona_id, &owner, active)?;
            if !active {
                s.sessions.purge(&persona_id);
            }
            Ok(view)
        })
        .await
    }

    /// Delete a persona, end its session and hide its posts.
    ///
    /// Hidden posts stay available to moderators.
    pub async fn delete_persona(
        &self,
        owner: &UserId,
        persona_id: PersonaId,
    ) -> Result<PersonaDeletion, MasqueError> {
        let owner = owner.clone();
        self.run("delete_persona", move |s| {
            let hidden_posts = s.personas.delete_persona(&persona_id, &owner)?;
            s.sessions.purge(&persona_id);
            Ok(PersonaDeletion {
                persona_id,
                hidden_posts,
            })
        })
        .await
    }

    /// Refresh the persona's stealth address and issue a new anonymous
    /// session, superseding the previous one.
    pub async fn switch_persona(
        &self,
        owner: &UserId,
        persona_id: PersonaId,
    ) -> Result<SwitchedPersona, MasqueError> {
        let owner = owner.clone();
        self.run("switch_persona", move |s| {
            let persona = s.personas.switch_persona(&persona_id, &owner)?;
            let session = s.sessions.issue(&persona, s.clock.timestamp())?;
            Ok(SwitchedPersona {
                persona: persona.to_public_view(),
                session,
            })
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Public Reads
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_persona(&self, persona_id: PersonaId) -> Result<PublicPersonaView, MasqueError> {
        self.run("get_persona", move |s| s.personas.resolve_public(&persona_id))
            .await
    }

    pub async fn feed(&self, filter: FeedFilter) -> Result<FeedPage, MasqueError> {
        self.run("feed", move |s| s.content.list_feed(&filter)).await
    }

    pub async fn get_post(&self, post_id: PostId) -> Result<PublicPostView, MasqueError> {
        self.run("get_post", move |s| s.content.get_post(&post_id)).await
    }

    pub fn session_state(&self, persona_id: &PersonaId) -> SessionState {
        self.services
            .sessions
            .state(persona_id, self.services.clock.timestamp())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Anonymous Side
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a post, sanitizing `uploads` first.
    ///
    /// If anything fails after an upload was written, the written files are
    /// removed again.
    pub async fn create_post(
        &self,
        ctx: &AnonymousContext,
        post: NewPost,
        uploads: Vec<Upload>,
    ) -> Result<PublicPostView, MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("create_post", move |s| {
            s.create_post_with_uploads(&persona_id, post, &uploads)
        })
        .await
    }

    pub async fn upload(
        &self,
        ctx: &AnonymousContext,
        upload: Upload,
    ) -> Result<SanitizedUpload, MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("upload", move |s| {
            s.personas.resolve_active(&persona_id)?;
            s.sanitizer.sanitize(&upload.name, &upload.bytes)
        })
        .await
    }

    pub async fn toggle_like(
        &self,
        ctx: &AnonymousContext,
        post_id: PostId,
    ) -> Result<LikeAction, MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("toggle_like", move |s| s.content.toggle_like(&post_id, &persona_id))
            .await
    }

    pub async fn add_comment(
        &self,
        ctx: &AnonymousContext,
        post_id: PostId,
        content: String,
        lifespan_hours: Option<u32>,
    ) -> Result<PublicCommentView, MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("add_comment", move |s| {
            s.content
                .add_comment(&post_id, &persona_id, &content, lifespan_hours)
        })
        .await
    }

    pub async fn delete_post(&self, ctx: &AnonymousContext, post_id: PostId) -> Result<(), MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("delete_post", move |s| s.content.delete_post(&post_id, &persona_id))
            .await
    }

    /// Mixing configuration for the persona's traffic.
    pub async fn route_plan(&self, ctx: &AnonymousContext) -> Result<RoutePlan, MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("route_plan", move |s| {
            let persona = s.personas.resolve_active(&persona_id)?;
            TrafficMixingPlanner::plan_route(&persona)
        })
        .await
    }

    pub async fn logout(&self, ctx: &AnonymousContext) -> Result<(), MasqueError> {
        let persona_id = ctx.persona_id;
        self.run("logout", move |s| {
            s.sessions.logout(&persona_id, s.clock.timestamp());
            Ok(())
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Moderation
    // ═══════════════════════════════════════════════════════════════════════

    /// Report a post from either domain. Professional reporters are stored
    /// as a keyed digest, never by user id.
    pub async fn report_post(
        &self,
        ctx: &RequestContext,
        post_id: PostId,
        reason: String,
    ) -> Result<(), MasqueError> {
        let ctx = ctx.clone();
        self.run("report_post", move |s| {
            let source = match &ctx {
                RequestContext::Professional(professional) => ReportSource::Professional {
                    reporter_digest: s.sessions.reporter_digest(&professional.user)?,
                },
                RequestContext::Anonymous(anonymous) => ReportSource::Anonymous {
                    reporter: anonymous.persona_id,
                },
            };
            s.content.report_post(&post_id, source, &reason)
        })
        .await
    }

    pub async fn moderation_queue(&self) -> Result<Vec<ModeratorPostView>, MasqueError> {
        self.run("moderation_queue", |s| s.content.moderation_queue())
            .await
    }

    pub async fn remove_post(
        &self,
        post_id: PostId,
        note: String,
    ) -> Result<ModeratorPostView, MasqueError> {
        self.run("remove_post", move |s| s.content.remove_post(&post_id, &note))
            .await
    }

    pub async fn restore_post(&self, post_id: PostId) -> Result<ModeratorPostView, MasqueError> {
        self.run("restore_post", move |s| s.content.restore_post(&post_id))
            .await
    }

    /// Hard-delete expired posts that are not held for moderation.
    pub async fn purge_expired(&self) -> Result<usize, MasqueError> {
        self.run("purge_expired", |s| s.content.purge_expired()).await
    }
}
