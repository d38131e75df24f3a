//! Persona lifecycle, ownership and quota
//!
//! The store is the only component that knows which professional user owns
//! which persona. Everything it hands outward is a [`PublicPersonaView`];
//! the owner id appears only in arguments, never in results or logs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MasqueConfig;
use crate::directory::ProfessionalDirectory;
use crate::error::MasqueError;
use crate::identity::{PersonaIdentityGenerator, PrivateIdentity, StealthAddressEngine};
use crate::storage::Storage;
use crate::types::{Persona, PersonaId, PersonaUpdate, PublicPersonaView, UserId};

/// Result of a successful `create_persona`.
///
/// `private_identity` exists only here; the caller must hand it to the
/// client and drop it.
#[derive(Debug)]
pub struct CreatedPersona {
    pub persona: PublicPersonaView,
    pub private_identity: PrivateIdentity,
}

pub struct PersonaStore {
    storage: Storage,
    directory: Arc<dyn ProfessionalDirectory>,
    config: Arc<MasqueConfig>,
    clock: Arc<dyn Clock>,
}

impl PersonaStore {
    pub fn new(
        storage: Storage,
        directory: Arc<dyn ProfessionalDirectory>,
        config: Arc<MasqueConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            directory,
            config,
            clock,
        }
    }

    /// Mint a persona for a verified owner.
    ///
    /// Fails with `NotVerified` for any other verification state and with
    /// `QuotaExceeded` when the owner already holds the maximum number of
    /// active personas.
    pub fn create_persona(&self, owner: &UserId) -> Result<CreatedPersona, MasqueError> {
        let (persona, private_identity) = self.create(owner)?;
        Ok(CreatedPersona {
            persona: persona.to_public_view(),
            private_identity,
        })
    }

    /// Like `create_persona`, but hands back the stored record so the
    /// caller can open a session for it.
    pub(crate) fn create(
        &self,
        owner: &UserId,
    ) -> Result<(Persona, PrivateIdentity), MasqueError> {
        let status = self.directory.verification_status(owner)?;
        if !status.may_own_personas() {
            return Err(MasqueError::NotVerified);
        }

        let now = self.clock.timestamp();
        let generated = PersonaIdentityGenerator::generate(self.config.anonymity_mix_factor, now)?;
        let persona = Persona::new(
            owner.clone(),
            generated.display_name.clone(),
            generated.crypto_material(),
            now,
        )?;

        self.storage
            .insert_persona_within_quota(&persona, self.config.max_personas_per_user)?;

        info!(persona_id = %persona.id, "Persona created");
        Ok((persona, generated.private_identity))
    }

    pub fn personas_for_owner(&self, owner: &UserId) -> Result<Vec<PublicPersonaView>, MasqueError> {
        Ok(self
            .storage
            .list_personas_for_owner(owner)?
            .iter()
            .map(Persona::to_public_view)
            .collect())
    }

    pub fn update_persona(
        &self,
        id: &PersonaId,
        owner: &UserId,
        update: &PersonaUpdate,
    ) -> Result<PublicPersonaView, MasqueError> {
        update.validate()?;
        let now = self.clock.timestamp();
        let updated = self.mutate_owned(id, owner, |persona| Ok(update.apply(persona, now)))?;
        debug!(persona_id = %id, "Persona updated");
        Ok(updated.to_public_view())
    }

    /// Deactivate or reactivate. Reactivation obeys the active quota.
    pub fn set_active(
        &self,
        id: &PersonaId,
        owner: &UserId,
        active: bool,
    ) -> Result<PublicPersonaView, MasqueError> {
        let now = self.clock.timestamp();
        let updated = self.mutate_owned(id, owner, |persona| {
            let mut persona = persona.clone();
            persona.is_active = active;
            persona.updated_at = now;
            Ok(persona)
        })?;
        info!(persona_id = %id, active, "Persona activation changed");
        Ok(updated.to_public_view())
    }

    /// Ownership-checked hard delete. The persona's posts are hidden in the
    /// same transaction; returns how many were hidden.
    pub fn delete_persona(&self, id: &PersonaId, owner: &UserId) -> Result<usize, MasqueError> {
        self.load_owned(id, owner)?;
        let now = self.clock.timestamp();
        let (_, hidden) = self
            .storage
            .delete_persona_with_posts(id, |post| post.hide_for_deleted_author(now))?
            .ok_or_else(|| MasqueError::NotFound("persona".to_string()))?;
        info!(persona_id = %id, hidden, "Persona deleted");
        Ok(hidden)
    }

    /// Refresh salt and stealth address of an active persona the caller
    /// owns, in one write transaction.
    pub fn switch_persona(&self, id: &PersonaId, owner: &UserId) -> Result<Persona, MasqueError> {
        let now = self.clock.timestamp();
        let mix_factor = self.config.anonymity_mix_factor;
        let switched = self.mutate_owned(id, owner, |persona| {
            if !persona.is_active {
                return Err(MasqueError::NotFound("persona".to_string()));
            }
            let mut refreshed = StealthAddressEngine::refresh(persona, now, mix_factor)?;
            refreshed.last_switched_at = Some(now);
            Ok(refreshed)
        })?;
        info!(persona_id = %id, "Persona switched, stealth address refreshed");
        Ok(switched)
    }

    /// Public lookup; the only one open to anonymous callers.
    pub fn resolve_public(&self, id: &PersonaId) -> Result<PublicPersonaView, MasqueError> {
        self.storage
            .load_persona(id)?
            .map(|p| p.to_public_view())
            .ok_or_else(|| MasqueError::NotFound("persona".to_string()))
    }

    /// Active persona by id, for authenticated anonymous flows.
    pub(crate) fn resolve_active(&self, id: &PersonaId) -> Result<Persona, MasqueError> {
        self.storage
            .load_persona(id)?
            .filter(|p| p.is_active)
            .ok_or_else(|| MasqueError::NotFound("persona".to_string()))
    }

    fn load_owned(&self, id: &PersonaId, owner: &UserId) -> Result<Persona, MasqueError> {
        let persona = self
            .storage
            .load_persona(id)?
            .ok_or_else(|| MasqueError::NotFound("persona".to_string()))?;
        check_owner(&persona, owner)?;
        Ok(persona)
    }

    fn mutate_owned<F>(&self, id: &PersonaId, owner: &UserId, mutate: F) -> Result<Persona, MasqueError>
    where
        F: FnOnce(&Persona) -> Result<Persona, MasqueError>,
    {
        self.storage
            .update_persona_with(id, self.config.max_personas_per_user, |persona| {
                check_owner(persona, owner)?;
                mutate(persona)
            })
    }
}

fn check_owner(persona: &Persona, owner: &UserId) -> Result<(), MasqueError> {
    if persona.owned_by(owner) {
        Ok(())
    } else {
        warn!(persona_id = %persona.id, "Ownership check failed");
        Err(MasqueError::NotAuthorized("persona".to_string()))
    }
}
