//! Masque Core Library
//!
//! Unlinkable personas for verified professional users.
//!
//! ## Overview
//!
//! A verified professional user can mint up to a configured number of
//! personas. Each persona has its own Ed25519 identity (the private key is
//! handed to the client once and never stored), a stealth address that is
//! refreshed on every switch, and its own anonymous session domain. Posts
//! made under a persona carry a content hash and an optional signature, and
//! uploads are stripped of metadata before they touch disk.
//!
//! ## Core Principles
//!
//! - **Non-linkability**: nothing that leaves the core ties a persona to
//!   its owner; anonymous tokens carry only the persona id
//! - **Client custody**: persona private keys exist server-side only for
//!   the instant of signing
//! - **Tamper evidence**: every post is hashed, optionally signed, and
//!   rechecked on read
//!
//! ## Quick Start
//!
//! ```ignore
//! use masque_core::{MasqueConfig, MasqueEngine, NewPost, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = MasqueEngine::new("~/.masque", MasqueConfig::from_env()?).await?;
//!     let alice = UserId::new("alice");
//!
//!     let created = engine.create_persona(&alice).await?;
//!     println!("keep this safe: {}", created.private_identity.private_key);
//!
//!     let switched = engine
//!         .switch_persona(&alice, created.persona.persona_id.parse()?)
//!         .await?;
//!     let ctx = engine.authenticate(&switched.session.token, "my-client").await?;
//!     engine.create_post(&ctx, NewPost::text("hello"), Vec::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod content;
pub mod crypto;
pub mod directory;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod integrity;
pub mod logging;
pub mod mixing;
pub mod persona_store;
pub mod sanitizer;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MasqueConfig, Secret};
pub use content::AnonymousContentStore;
pub use directory::{InMemoryDirectory, ProfessionalDirectory, StorageDirectory};
pub use engine::{
    EngineOptions, MasqueEngine, NewPersona, PersonaDeletion, SwitchedPersona, Upload,
};
pub use error::{MasqueError, MasqueResult, PublicError};
pub use gateway::{
    AnonymousContext, Gateway, ProfessionalAuthenticator, ProfessionalContext, RequestContext,
    RequestHeaders, TrustedHeaderAuthenticator,
};
pub use identity::{
    ContentSignature, GeneratedIdentity, PersonaIdentityGenerator, PersonaKeypair,
    PersonaPublicKey, PrivateIdentity, StealthAddressEngine,
};
pub use integrity::ContentIntegrityService;
pub use mixing::{MixingParameters, RouteHop, RoutePlan, TrafficMixingPlanner};
pub use persona_store::{CreatedPersona, PersonaStore};
pub use sanitizer::{MetadataSanitizer, SanitizedUpload};
pub use session::{
    AnonymousClaims, FingerprintInputs, IssuedSession, SessionFingerprint, SessionIsolationLayer,
    SessionState,
};
pub use storage::Storage;
pub use types::*;
