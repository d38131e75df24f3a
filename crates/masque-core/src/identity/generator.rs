//! Persona identity generation
//!
//! Every input is drawn from the CSPRNG. Two personas of the same owner
//! share nothing but independent randomness.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::MasqueError;
use crate::identity::stealth::StealthAddressEngine;
use crate::mixing::{MixingParameters, TrafficMixingPlanner};
use crate::types::{CryptoMaterial, Salt, StealthAddress};

const ADJECTIVES: &[&str] = &[
    "Quiet", "Amber", "Silent", "Bright", "Hidden", "Swift", "Calm", "Misty", "Bold", "Gentle",
    "Lunar", "Solar", "Velvet", "Crimson", "Azure", "Silver", "Wandering", "Clever", "Distant",
    "Hollow", "Nimble", "Russet", "Rustic", "Frosted",
];

const NOUNS: &[&str] = &[
    "Falcon", "Harbor", "Willow", "Comet", "Otter", "Lantern", "Meadow", "Raven", "Summit",
    "Cedar", "Orbit", "Fox", "Heron", "Canyon", "Ember", "Glacier", "Sparrow", "Badger", "Reef",
    "Beacon", "Thistle", "Lynx", "Delta", "Quill",
];

/// Secret half of a new persona, handed to the client exactly once.
///
/// Never persisted or logged. Wiped from memory on drop.
#[derive(Serialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateIdentity {
    /// Hex Ed25519 seed used to sign content
    pub private_key: String,
    /// Hex stealth salt at creation time
    pub salt: String,
}

impl std::fmt::Debug for PrivateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateIdentity([redacted])")
    }
}

/// Output of [`PersonaIdentityGenerator::generate`]
#[derive(Debug)]
pub struct GeneratedIdentity {
    pub public_key_hash: String,
    pub stealth_address: StealthAddress,
    pub salt: Salt,
    pub display_name: String,
    pub mixing: MixingParameters,
    pub private_identity: PrivateIdentity,
}

impl GeneratedIdentity {
    pub fn crypto_material(&self) -> CryptoMaterial {
        CryptoMaterial {
            public_key_hash: self.public_key_hash.clone(),
            stealth_address: self.stealth_address.clone(),
            salt: self.salt.clone(),
            mixing: self.mixing.clone(),
        }
    }
}

pub struct PersonaIdentityGenerator;

impl PersonaIdentityGenerator {
    /// Mint fresh identity material.
    ///
    /// Fails closed with [`MasqueError::Crypto`] if the OS random source is
    /// unavailable.
    pub fn generate(mix_factor: f64, now: i64) -> Result<GeneratedIdentity, MasqueError> {
        let keypair = crypto::generate_keypair()?;
        let public_key_hash = keypair.public_key().hash_hex();
        let salt = Salt::generate()?;
        let stealth_address =
            StealthAddressEngine::derive(&public_key_hash, &salt, now, mix_factor)?;
        let mixing = TrafficMixingPlanner::generate_parameters(mix_factor)?;
        let display_name = Self::display_name()?;

        let private_identity = PrivateIdentity {
            private_key: keypair.to_secret_hex(),
            salt: salt.to_hex(),
        };

        Ok(GeneratedIdentity {
            public_key_hash,
            stealth_address,
            salt,
            display_name,
            mixing,
            private_identity,
        })
    }

    /// Adjective, noun and a four digit suffix, e.g. `QuietFalcon4821`.
    pub fn display_name() -> Result<String, MasqueError> {
        let mut rng = crypto::seeded_rng()?;
        let adjective = ADJECTIVES
            .choose(&mut rng)
            .ok_or_else(|| MasqueError::Crypto("empty word list".to_string()))?;
        let noun = NOUNS
            .choose(&mut rng)
            .ok_or_else(|| MasqueError::Crypto("empty word list".to_string()))?;
        let suffix: u16 = rng.random_range(1000..=9999);
        Ok(format!("{}{}{}", adjective, noun, suffix))
    }
}
