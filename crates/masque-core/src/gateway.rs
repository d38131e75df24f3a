//! Request routing between the professional and anonymous domains
//!
//! `x-anonymous-mode: true` sends a request down the anonymous path, where
//! only an anonymous session token is accepted. Anything else is a
//! professional request and is handed to the [`ProfessionalAuthenticator`].
//! The two paths share no credentials.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::error::MasqueError;
use crate::persona_store::PersonaStore;
use crate::session::{FingerprintInputs, SessionFingerprint, SessionIsolationLayer};
use crate::types::{PersonaId, UserId};

pub const ANONYMOUS_MODE_HEADER: &str = "x-anonymous-mode";
pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const USER_AGENT_HEADER: &str = "user-agent";

/// Header set by an authenticating proxy in front of the professional side
pub const TRUSTED_USER_HEADER: &str = "x-professional-user";

/// Case-insensitive header map
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    headers: HashMap<String, String>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `Bearer` credential from the authorization header
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.get(AUTHORIZATION_HEADER)?.trim();
        let (scheme, token) = value.split_once(' ')?;
        (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
    }

    pub fn anonymous_mode(&self) -> bool {
        self.get(ANONYMOUS_MODE_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Authentication of the professional domain, owned by the host platform.
pub trait ProfessionalAuthenticator: Send + Sync {
    fn authenticate(&self, headers: &RequestHeaders) -> Result<UserId, MasqueError>;
}

/// Trusts [`TRUSTED_USER_HEADER`] as set by an upstream proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedHeaderAuthenticator;

impl ProfessionalAuthenticator for TrustedHeaderAuthenticator {
    fn authenticate(&self, headers: &RequestHeaders) -> Result<UserId, MasqueError> {
        headers
            .get(TRUSTED_USER_HEADER)
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(UserId::new)
            .ok_or_else(|| MasqueError::Authentication("professional user missing".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfessionalContext {
    pub user: UserId,
}

/// An authenticated anonymous request. Carries the persona, never the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousContext {
    pub persona_id: PersonaId,
    pub session_id: String,
    pub expires_at: i64,
    pub fingerprint: SessionFingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContext {
    Professional(ProfessionalContext),
    Anonymous(AnonymousContext),
}

pub struct Gateway {
    sessions: Arc<SessionIsolationLayer>,
    personas: Arc<PersonaStore>,
    professional: Arc<dyn ProfessionalAuthenticator>,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn new(
        sessions: Arc<SessionIsolationLayer>,
        personas: Arc<PersonaStore>,
        professional: Arc<dyn ProfessionalAuthenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            personas,
            professional,
            clock,
        }
    }

    /// Authenticate a request on whichever path its headers select.
    pub fn resolve(&self, headers: &RequestHeaders) -> Result<RequestContext, MasqueError> {
        if headers.anonymous_mode() {
            let token = headers
                .bearer_token()
                .ok_or_else(|| MasqueError::Authentication("anonymous token missing".to_string()))?;
            let inputs = FingerprintInputs {
                user_agent: headers.get(USER_AGENT_HEADER).unwrap_or_default().to_string(),
            };
            self.anonymous(token, &inputs).map(RequestContext::Anonymous)
        } else {
            let user = self.professional.authenticate(headers)?;
            Ok(RequestContext::Professional(ProfessionalContext { user }))
        }
    }

    /// Anonymous path: token, persona and fingerprint.
    pub fn anonymous(
        &self,
        token: &str,
        inputs: &FingerprintInputs,
    ) -> Result<AnonymousContext, MasqueError> {
        let now = self.clock.timestamp();
        let claims = self.sessions.authenticate(token, now, |persona_id| {
            self.personas
                .resolve_active(persona_id)
                .map(|persona| persona.security)
                .map_err(|e| match e {
                    MasqueError::NotFound(_) => {
                        MasqueError::Authentication("persona unavailable".to_string())
                    }
                    other => other,
                })
        })?;
        let persona_id = claims.persona_id()?;
        let fingerprint = self.sessions.isolate_session(&persona_id, inputs)?;
        debug!(persona_id = %persona_id, suspicious = fingerprint.suspicious, "Anonymous request");

        Ok(AnonymousContext {
            persona_id,
            session_id: claims.session_id,
            expires_at: claims.expires_at,
            fingerprint,
        })
    }
}
