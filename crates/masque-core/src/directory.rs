//! Professional user directory
//!
//! The professional side of the platform owns user accounts and their
//! verification. This crate only asks one question of it: is this user
//! verified? [`ProfessionalDirectory`] is that seam.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::MasqueError;
use crate::storage::Storage;
use crate::types::{UserId, VerificationStatus};

/// Read-only view of professional verification state.
pub trait ProfessionalDirectory: Send + Sync {
    /// Unknown users are `Unverified`.
    fn verification_status(&self, user: &UserId) -> Result<VerificationStatus, MasqueError>;
}

/// In-process directory, for tests and embedding.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, VerificationStatus>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, user: UserId, status: VerificationStatus) {
        self.users.write().insert(user, status);
    }
}

impl ProfessionalDirectory for InMemoryDirectory {
    fn verification_status(&self, user: &UserId) -> Result<VerificationStatus, MasqueError> {
        Ok(self
            .users
            .read()
            .get(user)
            .copied()
            .unwrap_or(VerificationStatus::Unverified))
    }
}

/// Directory backed by the `users` table of the local database.
#[derive(Clone)]
pub struct StorageDirectory {
    storage: Storage,
}

impl StorageDirectory {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl ProfessionalDirectory for StorageDirectory {
    fn verification_status(&self, user: &UserId) -> Result<VerificationStatus, MasqueError> {
        Ok(self
            .storage
            .load_user_status(user)?
            .unwrap_or(VerificationStatus::Unverified))
    }
}
