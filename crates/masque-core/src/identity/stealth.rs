//! Stealth address derivation
//!
//! `address = hex(HMAC-SHA256(salt, public_key_hash || timestamp_be || mix_factor_be))`
//!
//! The timestamp and mix factor only separate successive derivations in
//! time. Unlinkability rests on the salt staying secret: a refresh draws a
//! new salt, and the old address cannot be recomputed from the new one.

use crate::crypto;
use crate::error::MasqueError;
use crate::types::{CryptoMaterial, Persona, Salt, StealthAddress};

/// Attempts before a refresh gives up on producing a new address
const MAX_REFRESH_ATTEMPTS: usize = 4;

pub struct StealthAddressEngine;

impl StealthAddressEngine {
    pub fn derive(
        public_key_hash: &str,
        salt: &Salt,
        timestamp: i64,
        mix_factor: f64,
    ) -> Result<StealthAddress, MasqueError> {
        let mac = crypto::hmac_parts(
            salt.as_bytes(),
            &[
                public_key_hash.as_bytes(),
                &timestamp.to_be_bytes(),
                &mix_factor.to_be_bytes(),
            ],
        )?;
        Ok(StealthAddress(hex::encode(mac)))
    }

    /// Return `persona` with a fresh salt and re-derived address.
    ///
    /// The input is left untouched. The new address always differs from
    /// the previous one.
    pub fn refresh(persona: &Persona, now: i64, mix_factor: f64) -> Result<Persona, MasqueError> {
        let previous = &persona.crypto.stealth_address;

        for _ in 0..MAX_REFRESH_ATTEMPTS {
            let salt = Salt::generate()?;
            let address = Self::derive(&persona.crypto.public_key_hash, &salt, now, mix_factor)?;
            if address == *previous {
                continue;
            }

            let mut refreshed = persona.clone();
            refreshed.crypto = CryptoMaterial {
                stealth_address: address,
                salt,
                ..persona.crypto.clone()
            };
            refreshed.updated_at = now;
            return Ok(refreshed);
        }

        Err(MasqueError::Crypto(
            "stealth refresh produced no new address".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PersonaIdentityGenerator;
    use crate::types::UserId;

    fn persona_at(now: i64) -> Persona {
        let generated = PersonaIdentityGenerator::generate(0.7, now).unwrap();
        Persona::new(
            UserId::new("owner"),
            generated.display_name.clone(),
            generated.crypto_material(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_derive_is_deterministic() {
        let salt = Salt::generate().unwrap();
        let a = StealthAddressEngine::derive("abc", &salt, 100, 0.7).unwrap();
        let b = StealthAddressEngine::derive("abc", &salt, 100, 0.7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_derive_varies_with_every_input() {
        let salt = Salt::generate().unwrap();
        let other_salt = Salt::generate().unwrap();
        let base = StealthAddressEngine::derive("abc", &salt, 100, 0.7).unwrap();

        assert_ne!(base, StealthAddressEngine::derive("abd", &salt, 100, 0.7).unwrap());
        assert_ne!(base, StealthAddressEngine::derive("abc", &other_salt, 100, 0.7).unwrap());
        assert_ne!(base, StealthAddressEngine::derive("abc", &salt, 101, 0.7).unwrap());
        assert_ne!(base, StealthAddressEngine::derive("abc", &salt, 100, 0.8).unwrap());
    }

    #[test]
    fn test_refresh_changes_salt_and_address_only() {
        let now = 1_700_000_000;
        let persona = persona_at(now);
        let refreshed = StealthAddressEngine::refresh(&persona, now, 0.7).unwrap();

        assert_ne!(refreshed.crypto.stealth_address, persona.crypto.stealth_address);
        assert_ne!(refreshed.crypto.salt, persona.crypto.salt);
        assert_eq!(refreshed.crypto.public_key_hash, persona.crypto.public_key_hash);
        assert_eq!(refreshed.id, persona.id);
        assert_eq!(refreshed.display_name, persona.display_name);
    }

    #[test]
    fn test_refresh_at_same_instant_still_changes_address() {
        let now = 1_700_000_000;
        let persona = persona_at(now);
        let once = StealthAddressEngine::refresh(&persona, now, 0.7).unwrap();
        let twice = StealthAddressEngine::refresh(&once, now, 0.7).unwrap();
        assert_ne!(once.crypto.stealth_address, twice.crypto.stealth_address);
    }
}
