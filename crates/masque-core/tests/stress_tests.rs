//! Concurrency stress tests
//!
//! Quota and engagement counters must hold when many requests race.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use masque_core::{
    AnonymousContext, EngineOptions, FeedFilter, InMemoryDirectory, LikeAction, ManualClock,
    MasqueConfig, MasqueEngine, MasqueError, NewPost, PersonaId, PostId, UserId,
    VerificationStatus,
};
use tempfile::TempDir;

const QUOTA: usize = 4;

struct Harness {
    engine: MasqueEngine,
    directory: Arc<InMemoryDirectory>,
    _temp: TempDir,
}

async fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let directory = Arc::new(InMemoryDirectory::new());
    let config = MasqueConfig::new(
        "stress-token-secret-0123456789abcdefghij",
        "stress-session-secret-0123456789abcdefghij",
    )
    .with_max_personas(QUOTA)
    .with_operation_timeout(Duration::from_secs(30));

    let engine = MasqueEngine::with_options(
        temp.path(),
        config,
        EngineOptions {
            directory: Some(directory.clone()),
            clock: Some(Arc::new(ManualClock::starting_now())),
            authenticator: None,
        },
    )
    .await
    .unwrap();

    Harness {
        engine,
        directory,
        _temp: temp,
    }
}

impl Harness {
    async fn session(&self, owner: &str) -> AnonymousContext {
        let user = UserId::new(owner);
        self.directory
            .set_status(user.clone(), VerificationStatus::Verified);
        let created = self.engine.create_persona(&user).await.unwrap();
        let id: PersonaId = created.persona.persona_id.parse().unwrap();
        let switched = self.engine.switch_persona(&user, id).await.unwrap();
        self.engine
            .authenticate(&switched.session.token, "stress")
            .await
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_respects_quota() {
    let h = harness().await;
    let alice = UserId::new("alice");
    h.directory
        .set_status(alice.clone(), VerificationStatus::Verified);

    let attempts = (0..16).map(|_| h.engine.create_persona(&alice));
    let results = join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(MasqueError::QuotaExceeded { limit }) if *limit == QUOTA))
        .count();

    assert_eq!(created, QUOTA);
    assert_eq!(refused, 16 - QUOTA);
    assert_eq!(h.engine.my_personas(&alice).await.unwrap().len(), QUOTA);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_likes_are_all_counted() {
    let h = harness().await;
    let author = h.session("author").await;
    let view = h
        .engine
        .create_post(&author, NewPost::text("popular"), Vec::new())
        .await
        .unwrap();
    let post_id = PostId::from_string(&view.post_id).unwrap();

    let mut fans = Vec::new();
    for i in 0..12 {
        fans.push(h.session(&format!("fan-{}", i)).await);
    }

    let likes = fans.iter().map(|fan| h.engine.toggle_like(fan, post_id));
    let results = join_all(likes).await;
    assert!(results
        .into_iter()
        .all(|r| matches!(r, Ok(LikeAction::Liked))));

    assert_eq!(h.engine.get_post(post_id).await.unwrap().like_count, fans.len());

    // Toggling again from half of them takes the likes back
    let unlikes = fans[..6].iter().map(|fan| h.engine.toggle_like(fan, post_id));
    let results = join_all(unlikes).await;
    assert!(results
        .into_iter()
        .all(|r| matches!(r, Ok(LikeAction::Unliked))));
    assert_eq!(h.engine.get_post(post_id).await.unwrap().like_count, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_posts_and_comments() {
    let h = harness().await;
    let mut authors = Vec::new();
    for i in 0..4 {
        authors.push(h.session(&format!("author-{}", i)).await);
    }

    let engine = &h.engine;
    let posts = authors.iter().flat_map(|author| {
        (0..5).map(move |n| {
            engine
                .create_post(author, NewPost::text(format!("note {}", n)), Vec::new())
        })
    });
    let created: Vec<_> = join_all(posts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(created.len(), 20);

    let target = PostId::from_string(&created[0].post_id).unwrap();
    let comments = authors.iter().map(|author| {
        h.engine
            .add_comment(author, target, "same time".to_string(), None)
    });
    assert!(join_all(comments).await.iter().all(Result::is_ok));

    let page = h
        .engine
        .feed(FeedFilter {
            limit: 100,
            ..FeedFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 20);
    assert_eq!(h.engine.get_post(target).await.unwrap().comments.len(), 4);
}
