//! Cryptographic primitives.
//!
//! Stateless helpers for hashing, keyed hashing, secure randomness and
//! signatures. Every function that can fail returns [`MasqueError::Crypto`]
//! and callers must reject the operation; there is no fallback to a weaker
//! randomness source.
//!
//! # Example
//!
//! ```
//! use masque_core::crypto;
//!
//! let keypair = crypto::generate_keypair().unwrap();
//! let signature = crypto::sign(b"hello", &keypair);
//! assert!(crypto::verify(b"hello", &signature, &keypair.public_key()));
//! assert!(!crypto::verify(b"hellO", &signature, &keypair.public_key()));
//! ```

use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use crate::error::MasqueError;
use crate::identity::{ContentSignature, PersonaKeypair, PersonaPublicKey};

type HmacSha256 = Hmac<Sha256>;

/// Digest size of SHA-256 and HMAC-SHA256 (32 bytes)
pub const DIGEST_SIZE: usize = 32;

/// Generate a fresh Ed25519 keypair from the OS CSPRNG.
pub fn generate_keypair() -> Result<PersonaKeypair, MasqueError> {
    PersonaKeypair::generate()
}

/// SHA-256 digest of `data`.
pub fn hash(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 digest of `data`.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash(data))
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; DIGEST_SIZE], MasqueError> {
    hmac_parts(key, &[data])
}

/// HMAC-SHA256 over several byte strings fed in order.
///
/// Callers that concatenate variable-length inputs must delimit them
/// themselves.
pub fn hmac_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; DIGEST_SIZE], MasqueError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| MasqueError::Crypto(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

/// Fill `buf` from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), MasqueError> {
    getrandom::getrandom(buf)
        .map_err(|e| MasqueError::Crypto(format!("Secure random source unavailable: {}", e)))
}

/// `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, MasqueError> {
    let mut buf = vec![0u8; n];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Fixed-size array from the OS CSPRNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], MasqueError> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// A ChaCha-based CSPRNG seeded from the OS source, for range and
/// choice sampling.
pub fn seeded_rng() -> Result<StdRng, MasqueError> {
    Ok(StdRng::from_seed(random_array::<32>()?))
}

/// Sign `content` with a persona keypair.
pub fn sign(content: &[u8], keypair: &PersonaKeypair) -> ContentSignature {
    keypair.sign(content)
}

/// Verify `signature` over `content` with `public_key`.
pub fn verify(content: &[u8], signature: &ContentSignature, public_key: &PersonaPublicKey) -> bool {
    public_key.verify(content, signature)
}
