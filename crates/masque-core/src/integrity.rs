//! Tamper evidence for anonymous posts
//!
//! Every post carries a SHA-256 hash over a canonical encoding of its
//! content and media references. When the client supplies the persona's
//! private key the hash is also signed with Ed25519; the key is used once
//! and dropped.

use tracing::warn;

use crate::crypto;
use crate::error::MasqueError;
use crate::identity::PersonaKeypair;
use crate::types::{IntegrityRecord, IntegrityStatus, MediaPath, Persona};

const CANONICAL_DOMAIN: &[u8] = b"masque-post-v1";

pub struct ContentIntegrityService;

impl ContentIntegrityService {
    /// Hash (and optionally sign) a post body before it is stored.
    ///
    /// A signing key whose public key does not hash to the persona's
    /// `public_key_hash` is rejected with `Validation`.
    pub fn seal(
        content: Option<&str>,
        media: &[MediaPath],
        signing_key: Option<&str>,
        persona: &Persona,
    ) -> Result<IntegrityRecord, MasqueError> {
        let digest = crypto::hash(&canonical_bytes(content, media));
        let content_hash = hex::encode(digest);

        let Some(signing_key) = signing_key else {
            return Ok(IntegrityRecord {
                content_hash,
                signature: None,
                signer_public_key: None,
                status: IntegrityStatus::Unverified,
            });
        };

        let keypair = PersonaKeypair::from_hex(signing_key)
            .map_err(|_| MasqueError::Validation("malformed signing key".to_string()))?;
        let public_key = keypair.public_key();
        if public_key.hash_hex() != persona.crypto.public_key_hash {
            return Err(MasqueError::Validation(
                "signing key does not belong to this persona".to_string(),
            ));
        }

        let signature = keypair.sign(&digest);
        Ok(IntegrityRecord {
            content_hash,
            signature: Some(signature),
            signer_public_key: Some(public_key),
            status: IntegrityStatus::Verified,
        })
    }

    /// Recheck a stored record against the stored body.
    pub fn verify(
        content: Option<&str>,
        media: &[MediaPath],
        record: &IntegrityRecord,
        persona_public_key_hash: Option<&str>,
    ) -> IntegrityStatus {
        let digest = crypto::hash(&canonical_bytes(content, media));
        if hex::encode(digest) != record.content_hash {
            warn!("Content hash mismatch");
            return IntegrityStatus::Failed;
        }

        match (&record.signature, &record.signer_public_key) {
            (None, None) if record.status == IntegrityStatus::Verified => {
                warn!("Signature missing from a signed record");
                IntegrityStatus::Failed
            }
            (None, None) => IntegrityStatus::Unverified,
            (Some(signature), Some(public_key)) => {
                if !public_key.verify(&digest, signature) {
                    warn!("Content signature mismatch");
                    return IntegrityStatus::Failed;
                }
                match persona_public_key_hash {
                    Some(expected) if public_key.hash_hex() != expected => {
                        warn!("Signer is not the authoring persona");
                        IntegrityStatus::Failed
                    }
                    _ => IntegrityStatus::Verified,
                }
            }
            _ => IntegrityStatus::Failed,
        }
    }
}

/// Length-delimited encoding, so moving bytes between content and media
/// changes the hash.
fn canonical_bytes(content: Option<&str>, media: &[MediaPath]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        CANONICAL_DOMAIN.len() + content.map_or(0, str::len) + media.len() * 48 + 32,
    );
    buf.extend_from_slice(CANONICAL_DOMAIN);

    match content {
        Some(text) => {
            buf.push(1);
            buf.extend_from_slice(&(text.len() as u64).to_be_bytes());
            buf.extend_from_slice(text.as_bytes());
        }
        None => buf.push(0),
    }

    buf.extend_from_slice(&(media.len() as u64).to_be_bytes());
    for path in media {
        let name = path.as_str().as_bytes();
        buf.extend_from_slice(&(name.len() as u64).to_be_bytes());
        buf.extend_from_slice(name);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PersonaIdentityGenerator;
    use crate::types::UserId;

    const NOW: i64 = 1_700_000_000;

    fn persona_with_key() -> (Persona, String) {
        let generated = PersonaIdentityGenerator::generate(0.7, NOW).unwrap();
        let persona = Persona::new(
            UserId::new("owner"),
            generated.display_name.clone(),
            generated.crypto_material(),
            NOW,
        )
        .unwrap();
        (persona, generated.private_identity.private_key.clone())
    }

    fn media(stem_byte: char) -> MediaPath {
        MediaPath::parse(&format!("{}.jpg", stem_byte.to_string().repeat(32))).unwrap()
    }

    #[test]
    fn test_unsigned_seal_verifies_as_unverified() {
        let (persona, _) = persona_with_key();
        let record = ContentIntegrityService::seal(Some("hello"), &[], None, &persona).unwrap();

        assert_eq!(record.status, IntegrityStatus::Unverified);
        assert_eq!(record.content_hash.len(), 64);
        assert_eq!(
            ContentIntegrityService::verify(Some("hello"), &[], &record, None),
            IntegrityStatus::Unverified
        );
        assert_eq!(
            ContentIntegrityService::verify(Some("hellO"), &[], &record, None),
            IntegrityStatus::Failed
        );
    }

    #[test]
    fn test_signed_seal_verifies() {
        let (persona, key) = persona_with_key();
        let files = [media('a')];
        let record =
            ContentIntegrityService::seal(Some("signed"), &files, Some(&key), &persona).unwrap();

        assert_eq!(record.status, IntegrityStatus::Verified);
        assert_eq!(
            ContentIntegrityService::verify(
                Some("signed"),
                &files,
                &record,
                Some(&persona.crypto.public_key_hash)
            ),
            IntegrityStatus::Verified
        );
        assert_eq!(
            ContentIntegrityService::verify(Some("signed"), &[media('b')], &record, None),
            IntegrityStatus::Failed
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let (persona, _) = persona_with_key();
        let (_, other_key) = persona_with_key();
        let result = ContentIntegrityService::seal(Some("x"), &[], Some(&other_key), &persona);
        assert!(matches!(result, Err(MasqueError::Validation(_))));

        let result = ContentIntegrityService::seal(Some("x"), &[], Some("zz"), &persona);
        assert!(matches!(result, Err(MasqueError::Validation(_))));
    }

    #[test]
    fn test_signer_must_match_persona() {
        let (persona, key) = persona_with_key();
        let (other, _) = persona_with_key();
        let record = ContentIntegrityService::seal(Some("x"), &[], Some(&key), &persona).unwrap();

        assert_eq!(
            ContentIntegrityService::verify(
                Some("x"),
                &[],
                &record,
                Some(&other.crypto.public_key_hash)
            ),
            IntegrityStatus::Failed
        );
    }

    #[test]
    fn test_stripped_signer_key_fails() {
        let (persona, key) = persona_with_key();
        let mut record =
            ContentIntegrityService::seal(Some("x"), &[], Some(&key), &persona).unwrap();
        record.signer_public_key = None;
        assert_eq!(
            ContentIntegrityService::verify(Some("x"), &[], &record, None),
            IntegrityStatus::Failed
        );
    }

    #[test]
    fn test_fully_stripped_signature_fails() {
        let (persona, key) = persona_with_key();
        let mut record =
            ContentIntegrityService::seal(Some("x"), &[], Some(&key), &persona).unwrap();
        record.signature = None;
        record.signer_public_key = None;
        assert_eq!(
            ContentIntegrityService::verify(Some("x"), &[], &record, None),
            IntegrityStatus::Failed
        );
    }

    #[test]
    fn test_canonical_encoding_is_unambiguous() {
        assert_ne!(canonical_bytes(None, &[]), canonical_bytes(Some(""), &[]));
        assert_ne!(
            canonical_bytes(Some("ab"), &[media('c')]),
            canonical_bytes(Some("a"), &[media('c')])
        );
    }
}
