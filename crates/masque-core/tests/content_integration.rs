//! Anonymous content through the engine
//!
//! Posting, expiry, uploads, engagement and moderation, with the request
//! context resolved from headers the way a web frontend would.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use masque_core::{
    AnonymousContext, EngineOptions, FeedFilter, InMemoryDirectory, IntegrityStatus, LikeAction,
    ManualClock, MasqueConfig, MasqueEngine, MasqueError, NewPost, PersonaId, PostId, PostType,
    RequestContext, RequestHeaders, ReportSource, Upload, UserId, VerificationStatus,
};
use tempfile::TempDir;
use zeroize::Zeroizing;

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    engine: MasqueEngine,
    directory: Arc<InMemoryDirectory>,
    clock: Arc<ManualClock>,
    temp: TempDir,
}

struct Author {
    ctx: AnonymousContext,
    token: String,
    private_key: String,
}

async fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let directory = Arc::new(InMemoryDirectory::new());
    let clock = Arc::new(ManualClock::starting_now());
    let config = MasqueConfig::new("t".repeat(40), "s".repeat(40)).with_max_personas(5);

    let engine = MasqueEngine::with_options(
        temp.path(),
        config,
        EngineOptions {
            directory: Some(directory.clone()),
            clock: Some(clock.clone()),
            authenticator: None,
        },
    )
    .await
    .unwrap();

    Harness {
        engine,
        directory,
        clock,
        temp,
    }
}

impl Harness {
    async fn author(&self, owner: &str) -> Author {
        let user = UserId::new(owner);
        self.directory
            .set_status(user.clone(), VerificationStatus::Verified);
        let created = self.engine.create_persona(&user).await.unwrap();
        let id: PersonaId = created.persona.persona_id.parse().unwrap();
        let switched = self.engine.switch_persona(&user, id).await.unwrap();
        let ctx = self
            .engine
            .authenticate(&switched.session.token, "Mozilla/5.0")
            .await
            .unwrap();
        Author {
            ctx,
            token: switched.session.token.clone(),
            private_key: created.private_identity.private_key.clone(),
        }
    }

    async fn post(&self, author: &Author, text: &str) -> PostId {
        let view = self
            .engine
            .create_post(&author.ctx, NewPost::text(text), Vec::new())
            .await
            .unwrap();
        PostId::from_string(&view.post_id).unwrap()
    }

    fn upload_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("uploads")
    }
}

fn jpeg_with_exif(marker: &[u8]) -> Vec<u8> {
    let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(marker);
    let len = (payload.len() + 2) as u16;

    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// ============================================================================
// Posting and Expiry
// ============================================================================

#[tokio::test]
async fn test_ephemeral_post_disappears() {
    let h = harness().await;
    let author = h.author("alice").await;

    let post = NewPost {
        lifespan_hours: Some(1),
        ..NewPost::text("gone soon")
    };
    let view = h
        .engine
        .create_post(&author.ctx, post, Vec::new())
        .await
        .unwrap();
    let id = PostId::from_string(&view.post_id).unwrap();
    assert!(h.engine.get_post(id).await.is_ok());

    h.clock.advance(chrono::Duration::hours(2));
    let err = h.engine.get_post(id).await.unwrap_err();
    assert!(matches!(err, MasqueError::NotFound(_)));
    assert_eq!(h.engine.feed(FeedFilter::default()).await.unwrap().total, 0);

    assert_eq!(h.engine.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_post_rejected() {
    let h = harness().await;
    let author = h.author("alice").await;

    let err = h
        .engine
        .create_post(&author.ctx, NewPost::default(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MasqueError::Validation(_)));
    assert_eq!(err.to_public().status, 400);
}

#[tokio::test]
async fn test_signed_post_with_client_key() {
    let h = harness().await;
    let author = h.author("alice").await;
    let other = h.author("bob").await;

    let post = NewPost {
        signing_key: Some(Zeroizing::new(author.private_key.clone())),
        ..NewPost::text("provably mine")
    };
    let view = h
        .engine
        .create_post(&author.ctx, post, Vec::new())
        .await
        .unwrap();
    let id = PostId::from_string(&view.post_id).unwrap();
    assert!(h.engine.get_post(id).await.is_ok());
    assert!(h.engine.moderation_queue().await.unwrap().is_empty());

    // Someone else's key is refused outright
    let forged = NewPost {
        signing_key: Some(Zeroizing::new(other.private_key.clone())),
        ..NewPost::text("not mine")
    };
    assert!(matches!(
        h.engine.create_post(&author.ctx, forged, Vec::new()).await,
        Err(MasqueError::Validation(_))
    ));
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn test_upload_strips_metadata_and_renames() {
    let h = harness().await;
    let author = h.author("alice").await;
    let marker = b"GPS:48.8584N,2.2945E;Serial:CAM-0042";

    let stored = h
        .engine
        .upload(
            &author.ctx,
            Upload {
                name: "IMG_2024_holiday.JPG".to_string(),
                bytes: jpeg_with_exif(marker),
            },
        )
        .await
        .unwrap();

    assert!(!stored.metadata_stripping_skipped);
    assert!(stored.path.as_str().ends_with(".jpg"));
    assert!(!stored.path.as_str().contains("holiday"));

    let on_disk = std::fs::read(h.upload_dir().join(stored.path.as_str())).unwrap();
    assert!(!on_disk.windows(marker.len()).any(|w| w == marker));

    let post = NewPost {
        media: vec![stored.path.clone()],
        ..Default::default()
    };
    let view = h
        .engine
        .create_post(&author.ctx, post, Vec::new())
        .await
        .unwrap();
    assert_eq!(view.post_type, PostType::Image);
}

#[tokio::test]
async fn test_post_with_inline_uploads() {
    let h = harness().await;
    let author = h.author("alice").await;

    let uploads = vec![
        Upload {
            name: "a.jpg".to_string(),
            bytes: jpeg_with_exif(b"one"),
        },
        Upload {
            name: "b.mp4".to_string(),
            bytes: b"\x00\x00\x00\x18ftypmp42".to_vec(),
        },
    ];
    let view = h
        .engine
        .create_post(&author.ctx, NewPost::text("trip"), uploads)
        .await
        .unwrap();

    assert_eq!(view.media.len(), 2);
    assert_eq!(view.post_type, PostType::Mixed);
    assert_eq!(std::fs::read_dir(h.upload_dir()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_bad_upload_leaves_nothing_behind() {
    let h = harness().await;
    let author = h.author("alice").await;

    let uploads = vec![
        Upload {
            name: "good.jpg".to_string(),
            bytes: jpeg_with_exif(b"x"),
        },
        Upload {
            name: "broken.png".to_string(),
            bytes: b"definitely not a png".to_vec(),
        },
    ];
    let result = h
        .engine
        .create_post(&author.ctx, NewPost::text("x"), uploads)
        .await;

    assert!(matches!(result, Err(MasqueError::Validation(_))));
    assert_eq!(std::fs::read_dir(h.upload_dir()).unwrap().count(), 0);
    assert_eq!(h.engine.feed(FeedFilter::default()).await.unwrap().total, 0);
}

// ============================================================================
// Engagement
// ============================================================================

#[tokio::test]
async fn test_likes_and_comments() {
    let h = harness().await;
    let author = h.author("alice").await;
    let fan = h.author("bob").await;
    let id = h.post(&author, "hello").await;

    assert_eq!(
        h.engine.toggle_like(&fan.ctx, id).await.unwrap(),
        LikeAction::Liked
    );
    h.engine
        .add_comment(&fan.ctx, id, "nice".to_string(), None)
        .await
        .unwrap();

    let view = h.engine.get_post(id).await.unwrap();
    assert_eq!(view.like_count, 1);
    assert_eq!(view.comments.len(), 1);
    assert_eq!(view.comments[0].persona_id, fan.ctx.persona_id.to_base58());
}

#[tokio::test]
async fn test_only_author_can_delete() {
    let h = harness().await;
    let author = h.author("alice").await;
    let other = h.author("bob").await;
    let id = h.post(&author, "mine").await;

    let err = h.engine.delete_post(&other.ctx, id).await.unwrap_err();
    assert_eq!(err.to_public().status, 404);

    h.engine.delete_post(&author.ctx, id).await.unwrap();
    assert!(matches!(
        h.engine.get_post(id).await,
        Err(MasqueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_feed_filters_by_persona() {
    let h = harness().await;
    let alice = h.author("alice").await;
    let bob = h.author("bob").await;
    h.post(&alice, "a").await;
    h.post(&bob, "b").await;

    let page = h
        .engine
        .feed(FeedFilter {
            persona_id: Some(bob.ctx.persona_id),
            ..FeedFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.posts[0].content.as_deref(), Some("b"));
}

// ============================================================================
// Header Routing and Moderation
// ============================================================================

#[tokio::test]
async fn test_reports_from_both_domains() {
    let h = harness().await;
    let author = h.author("alice").await;
    let reporter = h.author("carol").await;
    let id = h.post(&author, "questionable").await;

    let anonymous = h
        .engine
        .resolve(
            RequestHeaders::new()
                .with("X-Anonymous-Mode", "true")
                .with("Authorization", format!("Bearer {}", reporter.token))
                .with("User-Agent", "Mozilla/5.0"),
        )
        .await
        .unwrap();
    assert!(matches!(anonymous, RequestContext::Anonymous(_)));

    let professional = h
        .engine
        .resolve(RequestHeaders::new().with("x-professional-user", "moderator-dave"))
        .await
        .unwrap();
    assert!(matches!(professional, RequestContext::Professional(_)));

    h.engine
        .report_post(&anonymous, id, "spam".to_string())
        .await
        .unwrap();
    h.engine
        .report_post(&professional, id, "off topic".to_string())
        .await
        .unwrap();
    assert!(matches!(
        h.engine
            .report_post(&professional, id, "again".to_string())
            .await,
        Err(MasqueError::Validation(_))
    ));

    let queue = h.engine.moderation_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].reports.len(), 2);
    assert_eq!(queue[0].integrity.status, IntegrityStatus::Unverified);

    let stored = serde_json::to_string(&queue[0].reports).unwrap();
    assert!(!stored.contains("moderator-dave"));
    assert!(queue[0]
        .reports
        .iter()
        .any(|r| matches!(r.source, ReportSource::Professional { .. })));
}

#[tokio::test]
async fn test_remove_and_restore() {
    let h = harness().await;
    let author = h.author("alice").await;
    let id = h.post(&author, "borderline").await;

    let removed = h
        .engine
        .remove_post(id, "under review".to_string())
        .await
        .unwrap();
    assert!(removed.removal.is_some());
    assert!(matches!(
        h.engine.get_post(id).await,
        Err(MasqueError::NotFound(_))
    ));

    h.engine.restore_post(id).await.unwrap();
    assert!(h.engine.get_post(id).await.is_ok());
}

#[tokio::test]
async fn test_route_plan_for_session_persona() {
    let h = harness().await;
    let author = h.author("alice").await;

    let plan = h.engine.route_plan(&author.ctx).await.unwrap();
    // Default mix factor 0.7 enables multi-path routing
    assert!(!plan.is_direct());
    assert!(plan.hops.iter().all(|hop| hop.node_id.starts_with("relay-")));
}

#[tokio::test]
async fn test_anonymous_path_requires_token() {
    let h = harness().await;
    let err = h
        .engine
        .resolve(RequestHeaders::new().with("x-anonymous-mode", "true"))
        .await
        .unwrap_err();
    assert!(matches!(err, MasqueError::Authentication(_)));
    assert_eq!(err.to_public().status, 401);
}
