//! Runtime configuration.
//!
//! Built once at startup and handed to the services by `Arc`. Core logic
//! never reads the process environment itself; only [`MasqueConfig::from_env`]
//! does.

use std::path::PathBuf;
use std::time::Duration;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::MasqueError;

/// Default number of active personas a single owner may hold
pub const DEFAULT_MAX_PERSONAS_PER_USER: usize = 3;

/// Default mix factor folded into stealth derivation and mixing parameters
pub const DEFAULT_MIX_FACTOR: f64 = 0.7;

/// Default and maximum lifetime of an anonymous session token
pub const MAX_SESSION_TTL_HOURS: u32 = 24;

/// Default bound for a single storage/crypto operation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Secret material with a redacted `Debug` that is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

/// Constant time in the contents; only the lengths may short-circuit.
impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([redacted; {} bytes])", self.0.len())
    }
}

/// Configuration for the anonymous-identity core.
#[derive(Debug, Clone)]
pub struct MasqueConfig {
    /// Signs anonymous-domain session tokens (`ANONYMOUS_JWT_SECRET`)
    pub anonymous_jwt_secret: Secret,
    /// Keys session fingerprints and reporter digests (`ANONYMOUS_SESSION_SECRET`)
    pub anonymous_session_secret: Secret,
    /// Professional-domain secret, only used to prove the domains are disjoint
    pub professional_jwt_secret: Option<Secret>,
    /// Active persona limit per owner (`MAX_PERSONAS_PER_USER`)
    pub max_personas_per_user: usize,
    /// Mix factor in (0, 1] (`ANONYMITY_MIX_FACTOR`)
    pub anonymity_mix_factor: f64,
    /// Anonymous session lifetime in hours, at most 24
    pub session_ttl_hours: u32,
    /// Bound applied to every storage/crypto call made by the engine
    pub operation_timeout: Duration,
    /// Directory receiving sanitized uploads
    pub upload_dir: PathBuf,
}

impl MasqueConfig {
    /// Create a configuration with the two anonymous-domain secrets and
    /// defaults for everything else.
    pub fn new(jwt_secret: impl Into<Secret>, session_secret: impl Into<Secret>) -> Self {
        Self {
            anonymous_jwt_secret: jwt_secret.into(),
            anonymous_session_secret: session_secret.into(),
            professional_jwt_secret: None,
            max_personas_per_user: DEFAULT_MAX_PERSONAS_PER_USER,
            anonymity_mix_factor: DEFAULT_MIX_FACTOR,
            session_ttl_hours: MAX_SESSION_TTL_HOURS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            upload_dir: PathBuf::from("uploads"),
        }
    }

    pub fn with_professional_secret(mut self, secret: impl Into<Secret>) -> Self {
        self.professional_jwt_secret = Some(secret.into());
        self
    }

    pub fn with_max_personas(mut self, limit: usize) -> Self {
        self.max_personas_per_user = limit;
        self
    }

    pub fn with_mix_factor(mut self, factor: f64) -> Self {
        self.anonymity_mix_factor = factor;
        self
    }

    pub fn with_session_ttl_hours(mut self, hours: u32) -> Self {
        self.session_ttl_hours = hours;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Read configuration from the process environment and validate it.
    ///
    /// Required: `ANONYMOUS_JWT_SECRET`, `ANONYMOUS_SESSION_SECRET`.
    /// Optional: `PROFESSIONAL_JWT_SECRET`, `MAX_PERSONAS_PER_USER`,
    /// `ANONYMITY_MIX_FACTOR`, `ANONYMOUS_SESSION_TTL_HOURS`,
    /// `MASQUE_OPERATION_TIMEOUT_MS`, `MASQUE_UPLOAD_DIR`.
    pub fn from_env() -> Result<Self, MasqueError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MasqueError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| MasqueError::Config(format!("{} is not set", key)))
        };

        let mut config = Self::new(
            required("ANONYMOUS_JWT_SECRET")?,
            required("ANONYMOUS_SESSION_SECRET")?,
        );

        if let Some(secret) = lookup("PROFESSIONAL_JWT_SECRET") {
            config.professional_jwt_secret = Some(secret.into());
        }
        if let Some(raw) = lookup("MAX_PERSONAS_PER_USER") {
            config.max_personas_per_user = parse_var("MAX_PERSONAS_PER_USER", &raw)?;
        }
        if let Some(raw) = lookup("ANONYMITY_MIX_FACTOR") {
            config.anonymity_mix_factor = parse_var("ANONYMITY_MIX_FACTOR", &raw)?;
        }
        if let Some(raw) = lookup("ANONYMOUS_SESSION_TTL_HOURS") {
            config.session_ttl_hours = parse_var("ANONYMOUS_SESSION_TTL_HOURS", &raw)?;
        }
        if let Some(raw) = lookup("MASQUE_OPERATION_TIMEOUT_MS") {
            let millis: u64 = parse_var("MASQUE_OPERATION_TIMEOUT_MS", &raw)?;
            config.operation_timeout = Duration::from_millis(millis);
        }
        if let Some(dir) = lookup("MASQUE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the services rely on.
    pub fn validate(&self) -> Result<(), MasqueError> {
        if self.anonymous_jwt_secret.len() < MIN_SECRET_LEN {
            return Err(MasqueError::Config(format!(
                "ANONYMOUS_JWT_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.anonymous_session_secret.len() < MIN_SECRET_LEN {
            return Err(MasqueError::Config(format!(
                "ANONYMOUS_SESSION_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.anonymous_jwt_secret == self.anonymous_session_secret {
            return Err(MasqueError::Config(
                "anonymous token and session secrets must differ".to_string(),
            ));
        }
        if let Some(professional) = &self.professional_jwt_secret {
            if *professional == self.anonymous_jwt_secret
                || *professional == self.anonymous_session_secret
            {
                return Err(MasqueError::Config(
                    "anonymous secrets must be disjoint from the professional secret".to_string(),
                ));
            }
        }
        if self.max_personas_per_user == 0 {
            return Err(MasqueError::Config(
                "MAX_PERSONAS_PER_USER must be at least 1".to_string(),
            ));
        }
        if !(self.anonymity_mix_factor > 0.0 && self.anonymity_mix_factor <= 1.0) {
            return Err(MasqueError::Config(
                "ANONYMITY_MIX_FACTOR must be in (0, 1]".to_string(),
            ));
        }
        if self.session_ttl_hours == 0 || self.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(MasqueError::Config(format!(
                "session TTL must be between 1 and {} hours",
                MAX_SESSION_TTL_HOURS
            )));
        }
        if self.operation_timeout.is_zero() {
            return Err(MasqueError::Config(
                "operation timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, MasqueError> {
    raw.trim()
        .parse()
        .map_err(|_| MasqueError::Config(format!("{} has an invalid value", key)))
}
