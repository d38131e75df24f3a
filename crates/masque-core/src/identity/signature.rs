//! Detached Ed25519 signature over post content

use ed25519_dalek::Signature as Ed25519Signature;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MasqueError;

/// Signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 signature produced by a client-held persona key.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentSignature(Ed25519Signature);

impl ContentSignature {
    pub(crate) fn new(inner: Ed25519Signature) -> Self {
        Self(inner)
    }

    pub(crate) fn inner(&self) -> &Ed25519Signature {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MasqueError> {
        Ed25519Signature::from_slice(bytes)
            .map(Self)
            .map_err(|_| MasqueError::Crypto("Invalid signature length".to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self, MasqueError> {
        let bytes = hex::decode(encoded)
            .map_err(|_| MasqueError::Crypto("Invalid signature encoding".to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for ContentSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentSignature({})", self.to_hex())
    }
}

impl Serialize for ContentSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PersonaKeypair;

    #[test]
    fn test_signature_serde_roundtrip() {
        let keypair = PersonaKeypair::generate().unwrap();
        let signature = keypair.sign(b"serde");

        let json = serde_json::to_string(&signature).unwrap();
        let recovered: ContentSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(signature, recovered);
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let keypair = PersonaKeypair::generate().unwrap();
        let signature = keypair.sign(b"message");

        let mut bytes = signature.to_bytes();
        bytes[10] ^= 0x01;
        let tampered = ContentSignature::from_bytes(&bytes).unwrap();
        assert!(!keypair.public_key().verify(b"message", &tampered));
    }

    #[test]
    fn test_short_signature_rejected() {
        assert!(ContentSignature::from_bytes(&[0u8; 10]).is_err());
    }
}
