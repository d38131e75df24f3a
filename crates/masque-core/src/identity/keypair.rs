//! Persona signing keypair (Ed25519)
//!
//! The server generates the keypair once, hands the secret half to the
//! client and keeps only the public key hash. A keypair is reconstructed
//! from client-supplied bytes only for the duration of a signing call.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto;
use crate::error::MasqueError;
use crate::identity::signature::ContentSignature;

/// Length of an encoded private key (Ed25519 seed)
pub const SECRET_KEY_LEN: usize = 32;

/// Length of an encoded public key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 keypair belonging to one persona.
pub struct PersonaKeypair {
    signing: SigningKey,
}

impl PersonaKeypair {
    /// Generate a new keypair from the OS CSPRNG.
    pub fn generate() -> Result<Self, MasqueError> {
        let mut seed = crypto::random_array::<SECRET_KEY_LEN>()?;
        let signing = SigningKey::from_bytes(&seed);
        seed.fill(0);
        Ok(Self { signing })
    }

    /// Rebuild a keypair from its 32-byte seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MasqueError> {
        let seed: [u8; SECRET_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| MasqueError::Crypto("Invalid private key length".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Rebuild a keypair from the hex form handed to clients.
    pub fn from_hex(encoded: &str) -> Result<Self, MasqueError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|_| MasqueError::Crypto("Invalid private key encoding".to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Hex encoding of the private seed. Only used to build the one-time
    /// client bundle.
    pub(crate) fn to_secret_hex(&self) -> String {
        hex::encode(self.signing.as_bytes())
    }

    pub fn public_key(&self) -> PersonaPublicKey {
        PersonaPublicKey(self.signing.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> ContentSignature {
        ContentSignature::new(self.signing.sign(message))
    }
}

impl std::fmt::Debug for PersonaKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaKeypair")
            .field(
                "public",
                &hex::encode(self.signing.verifying_key().as_bytes()),
            )
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key of a persona.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PersonaPublicKey(VerifyingKey);

impl PersonaPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MasqueError> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| MasqueError::Crypto("Invalid public key length".to_string()))?;
        VerifyingKey::from_bytes(&raw)
            .map(Self)
            .map_err(|_| MasqueError::Crypto("Invalid public key".to_string()))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, MasqueError> {
        let bytes = hex::decode(encoded)
            .map_err(|_| MasqueError::Crypto("Invalid public key encoding".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Hex SHA-256 of the raw public key; the persona's `public_key_hash`.
    pub fn hash_hex(&self) -> String {
        crypto::hash_hex(self.0.as_bytes())
    }

    /// Strict Ed25519 verification.
    pub fn verify(&self, message: &[u8], signature: &ContentSignature) -> bool {
        self.0.verify(message, signature.inner()).is_ok()
    }
}

impl std::fmt::Debug for PersonaPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PersonaPublicKey({})", self.to_hex())
    }
}

impl Serialize for PersonaPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PersonaPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}
