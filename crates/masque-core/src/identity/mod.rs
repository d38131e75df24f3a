//! Persona identity
//!
//! ## Overview
//!
//! - **Keypairs**: Ed25519, generated server-side once and handed to the
//!   client. The server keeps only the SHA-256 hash of the public key.
//! - **Stealth addresses**: HMAC of the public key hash under a secret
//!   per-persona salt, refreshed on every switch.
//! - **Signatures**: detached Ed25519 signatures over post content.
//!
//! ## Example
//!
//! ```rust
//! use masque_core::identity::{PersonaIdentityGenerator, PersonaKeypair};
//!
//! let generated = PersonaIdentityGenerator::generate(0.7, 1_700_000_000).unwrap();
//!
//! // The client signs with the private key it received once
//! let keypair = PersonaKeypair::from_hex(&generated.private_identity.private_key).unwrap();
//! let signature = keypair.sign(b"hello");
//!
//! assert!(keypair.public_key().verify(b"hello", &signature));
//! assert_eq!(keypair.public_key().hash_hex(), generated.public_key_hash);
//! ```

mod generator;
mod keypair;
mod signature;
mod stealth;

pub use generator::{GeneratedIdentity, PersonaIdentityGenerator, PrivateIdentity};
pub use keypair::{PersonaKeypair, PersonaPublicKey};
pub use signature::ContentSignature;
pub use stealth::StealthAddressEngine;
