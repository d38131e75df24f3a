//! Anonymous-domain sessions
//!
//! Anonymous tokens live in their own trust domain: they are MACed under
//! `ANONYMOUS_JWT_SECRET`, which configuration guarantees differs from the
//! professional secret, and their claims carry nothing but the persona id
//! and session bookkeeping.
//!
//! # Token format
//!
//! A compact HS256 token, `header.claims.mac`, each part base64url without
//! padding. `mac = HMAC-SHA256(secret, "header.claims")`.
//!
//! # Session state
//!
//! Token verification is pure. Revocation (logout, supersession, idle
//! timeout) and fingerprints are tracked in memory only and never persisted.
//! A valid token this process has not seen before is adopted on first use.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{MasqueConfig, Secret};
use crate::crypto;
use crate::error::MasqueError;
use crate::types::{Persona, PersonaId, SecuritySettings, UserId};

const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT","kid":"anonymous"}"#;

/// Tolerated clock skew for `issued_at` in the future
const MAX_CLOCK_SKEW_SECS: i64 = 60;

const SECS_PER_HOUR: i64 = 3600;
const SESSION_ID_BYTES: usize = 16;
const FINGERPRINT_SALT_BYTES: usize = 16;

/// Claims of an anonymous session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousClaims {
    /// Base58 persona id
    pub persona_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub session_id: String,
    pub fingerprint_salt: String,
}

impl AnonymousClaims {
    pub fn persona_id(&self) -> Result<PersonaId, MasqueError> {
        PersonaId::from_base58(&self.persona_id)
            .map_err(|_| MasqueError::Authentication("invalid persona claim".to_string()))
    }
}

/// A freshly issued session
#[derive(Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: AnonymousClaims,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

/// Client characteristics folded into the session fingerprint
#[derive(Debug, Clone, Default)]
pub struct FingerprintInputs {
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFingerprint {
    pub value: String,
    /// The fingerprint changed within this session
    pub suspicious: bool,
}

/// Session state of one persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    AnonymousSessionActive { expires_at: i64 },
}

struct SessionEntry {
    session_id: String,
    fingerprint_salt: String,
    issued_at: i64,
    expires_at: i64,
    last_seen: i64,
    security: SecuritySettings,
    fingerprint: Option<[u8; crypto::DIGEST_SIZE]>,
    suspicious: bool,
    ended: bool,
}

impl SessionEntry {
    fn from_claims(claims: &AnonymousClaims, security: SecuritySettings, now: i64) -> Self {
        Self {
            session_id: claims.session_id.clone(),
            fingerprint_salt: claims.fingerprint_salt.clone(),
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
            last_seen: now,
            security,
            fingerprint: None,
            suspicious: false,
            ended: false,
        }
    }

    fn is_live(&self, now: i64) -> bool {
        !self.ended && self.expires_at > now
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<PersonaId, SessionEntry>,
    /// Revoked session ids and their expiry, kept until the token would
    /// have expired anyway
    revoked: HashMap<String, i64>,
}

impl Registry {
    fn revoke(&mut self, entry: &SessionEntry) {
        self.revoked
            .insert(entry.session_id.clone(), entry.expires_at);
    }

    fn prune(&mut self, now: i64) {
        self.revoked.retain(|_, expires_at| *expires_at > now);
        self.sessions.retain(|_, entry| entry.expires_at > now);
    }
}

/// Issues and checks anonymous session tokens.
pub struct SessionIsolationLayer {
    config: Arc<MasqueConfig>,
    registry: RwLock<Registry>,
}

impl SessionIsolationLayer {
    pub fn new(config: Arc<MasqueConfig>) -> Self {
        Self {
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Issue a session for `persona`, superseding any previous one.
    pub fn issue(&self, persona: &Persona, now: i64) -> Result<IssuedSession, MasqueError> {
        let ttl_hours = i64::from(self.config.session_ttl_hours);
        let claims = AnonymousClaims {
            persona_id: persona.id.to_base58(),
            issued_at: now,
            expires_at: now + ttl_hours * SECS_PER_HOUR,
            session_id: hex::encode(crypto::random_array::<SESSION_ID_BYTES>()?),
            fingerprint_salt: hex::encode(crypto::random_array::<FINGERPRINT_SALT_BYTES>()?),
        };
        let token = encode_token(&self.config.anonymous_jwt_secret, &claims)?;

        let mut registry = self.registry.write();
        registry.prune(now);
        if let Some(previous) = registry.sessions.remove(&persona.id) {
            registry.revoke(&previous);
        }
        registry.sessions.insert(
            persona.id,
            SessionEntry::from_claims(&claims, persona.security, now),
        );

        info!(persona_id = %persona.id, expires_at = claims.expires_at, "Anonymous session issued");
        Ok(IssuedSession { token, claims })
    }

    /// Check a token's format, MAC and lifetime. Stateless.
    pub fn verify_token(&self, token: &str, now: i64) -> Result<AnonymousClaims, MasqueError> {
        let claims = decode_token(&self.config.anonymous_jwt_secret, token)?;

        if claims.expires_at <= now {
            return Err(MasqueError::Authentication("token expired".to_string()));
        }
        if claims.issued_at > now + MAX_CLOCK_SKEW_SECS {
            return Err(MasqueError::Authentication(
                "token issued in the future".to_string(),
            ));
        }
        let max_lifetime = i64::from(crate::config::MAX_SESSION_TTL_HOURS) * SECS_PER_HOUR;
        if claims.expires_at - claims.issued_at > max_lifetime {
            return Err(MasqueError::Authentication(
                "token lifetime too long".to_string(),
            ));
        }
        claims.persona_id()?;
        Ok(claims)
    }

    /// Verify a token and admit it against the session registry.
    ///
    /// `security_of` resolves the persona's security settings; it is only
    /// called once the token itself checks out.
    pub fn authenticate<F>(
        &self,
        token: &str,
        now: i64,
        security_of: F,
    ) -> Result<AnonymousClaims, MasqueError>
    where
        F: FnOnce(&PersonaId) -> Result<SecuritySettings, MasqueError>,
    {
        let claims = self.verify_token(token, now)?;
        let persona_id = claims.persona_id()?;
        let security = security_of(&persona_id)?;
        self.admit(&persona_id, &claims, security, now)?;
        Ok(claims)
    }

    fn admit(
        &self,
        persona_id: &PersonaId,
        claims: &AnonymousClaims,
        security: SecuritySettings,
        now: i64,
    ) -> Result<(), MasqueError> {
        let mut registry = self.registry.write();

        if registry.revoked.contains_key(&claims.session_id) {
            return Err(MasqueError::Authentication("session revoked".to_string()));
        }

        let adopt = match registry.sessions.get(persona_id) {
            None => true,
            Some(entry) if entry.session_id == claims.session_id => false,
            // A newer token minted elsewhere replaces the one we know about
            Some(entry) if claims.issued_at > entry.issued_at => true,
            Some(_) => {
                return Err(MasqueError::Authentication(
                    "session superseded".to_string(),
                ))
            }
        };

        if adopt {
            if let Some(previous) = registry.sessions.remove(persona_id) {
                registry.revoke(&previous);
            }
            debug!(persona_id = %persona_id, "Adopted anonymous session");
            registry
                .sessions
                .insert(*persona_id, SessionEntry::from_claims(claims, security, now));
            return Ok(());
        }

        let timed_out = match registry.sessions.get_mut(persona_id) {
            Some(entry) => {
                entry.security = security;
                let idle_limit = i64::from(security.auto_timeout_minutes) * 60;
                if idle_limit > 0 && now - entry.last_seen > idle_limit {
                    true
                } else {
                    entry.last_seen = now;
                    false
                }
            }
            None => false,
        };

        if timed_out {
            if let Some(entry) = registry.sessions.remove(persona_id) {
                registry.revoke(&entry);
            }
            info!(persona_id = %persona_id, "Anonymous session timed out");
            return Err(MasqueError::Authentication("session timed out".to_string()));
        }
        Ok(())
    }

    /// Compute the session fingerprint for this request.
    ///
    /// A fingerprint that differs from the one first seen in this session
    /// marks the session suspicious.
    pub fn isolate_session(
        &self,
        persona_id: &PersonaId,
        inputs: &FingerprintInputs,
    ) -> Result<SessionFingerprint, MasqueError> {
        let mut registry = self.registry.write();
        let entry = registry
            .sessions
            .get_mut(persona_id)
            .filter(|entry| !entry.ended)
            .ok_or_else(|| MasqueError::Authentication("no active session".to_string()))?;

        let value = crypto::hmac_parts(
            self.config.anonymous_session_secret.expose(),
            &[
                persona_id.as_bytes().as_slice(),
                inputs.user_agent.as_bytes(),
                entry.fingerprint_salt.as_bytes(),
            ],
        )?;

        match entry.fingerprint {
            None => entry.fingerprint = Some(value),
            Some(previous) if previous != value => {
                if !entry.suspicious && entry.security.notify_on_suspicious_activity {
                    warn!(persona_id = %persona_id, "Session fingerprint changed");
                }
                entry.suspicious = true;
            }
            Some(_) => {}
        }

        Ok(SessionFingerprint {
            value: hex::encode(value),
            suspicious: entry.suspicious,
        })
    }

    /// End the persona's session. With `purge_on_logout` the fingerprint
    /// state is discarded as well.
    pub fn logout(&self, persona_id: &PersonaId, now: i64) {
        let mut registry = self.registry.write();
        registry.prune(now);

        let Some(entry) = registry.sessions.remove(persona_id) else {
            return;
        };
        registry.revoke(&entry);

        if !entry.security.purge_on_logout {
            registry.sessions.insert(
                *persona_id,
                SessionEntry {
                    ended: true,
                    ..entry
                },
            );
        }
        info!(persona_id = %persona_id, "Anonymous session ended");
    }

    /// Drop every trace of the persona's session.
    pub fn purge(&self, persona_id: &PersonaId) {
        let mut registry = self.registry.write();
        if let Some(entry) = registry.sessions.remove(persona_id) {
            registry.revoke(&entry);
            debug!(persona_id = %persona_id, "Session state purged");
        }
    }

    pub fn state(&self, persona_id: &PersonaId, now: i64) -> SessionState {
        match self.registry.read().sessions.get(persona_id) {
            Some(entry) if entry.is_live(now) => SessionState::AnonymousSessionActive {
                expires_at: entry.expires_at,
            },
            _ => SessionState::Unauthenticated,
        }
    }

    /// Keyed digest standing in for a professional reporter's user id.
    ///
    /// Stable per user so duplicate reports can be detected, but not
    /// reversible without the session secret.
    pub fn reporter_digest(&self, user: &UserId) -> Result<String, MasqueError> {
        let digest = crypto::hmac_parts(
            self.config.anonymous_session_secret.expose(),
            &[b"reporter:".as_slice(), user.as_str().as_bytes()],
        )?;
        Ok(hex::encode(digest))
    }
}

fn encode_token(secret: &Secret, claims: &AnonymousClaims) -> Result<String, MasqueError> {
    let header = URL_SAFE_NO_PAD.encode(TOKEN_HEADER);
    let payload = serde_json::to_vec(claims).map_err(|e| MasqueError::Serialization(e.to_string()))?;
    let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(payload));
    let mac = crypto::hmac(secret.expose(), signing_input.as_bytes())?;
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(mac)))
}

fn decode_token(secret: &Secret, token: &str) -> Result<AnonymousClaims, MasqueError> {
    let malformed = || MasqueError::Authentication("malformed token".to_string());

    let mut parts = token.trim().split('.');
    let (Some(header), Some(payload), Some(mac), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let mac = URL_SAFE_NO_PAD.decode(mac).map_err(|_| malformed())?;
    let signing_input_len = header.len() + 1 + payload.len();
    let signing_input = &token.trim()[..signing_input_len];
    if !crypto::hmac_verify(secret.expose(), signing_input.as_bytes(), &mac) {
        return Err(MasqueError::Authentication("bad token signature".to_string()));
    }

    let header = URL_SAFE_NO_PAD.decode(header).map_err(|_| malformed())?;
    if header != TOKEN_HEADER.as_bytes() {
        return Err(MasqueError::Authentication("unexpected token header".to_string()));
    }

    let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
    serde_json::from_slice(&payload).map_err(|_| malformed())
}
