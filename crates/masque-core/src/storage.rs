//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Personas and the owner → persona index
//! - Anonymous posts with their engagement and moderation state
//! - Professional verification status (for the bundled directory)
//!
//! redb admits one write transaction at a time. Every check-then-write
//! sequence (quota enforcement, like toggles, comment appends) runs inside a
//! single write transaction so concurrent callers serialize on it.

use crate::error::MasqueError;
use parking_lot::RwLock;
use redb::Database;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

// Submodules
mod personas;
mod posts;
mod users;

pub use posts::RetiredPost;

use personas::{OWNER_INDEX_TABLE, PERSONAS_TABLE};
use posts::POSTS_TABLE;
use users::USERS_TABLE;

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Get a reference to the shared database handle
    pub fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }

    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MasqueError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PERSONAS_TABLE)?;
            let _ = write_txn.open_table(OWNER_INDEX_TABLE)?;
            let _ = write_txn.open_table(POSTS_TABLE)?;
            let _ = write_txn.open_table(USERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MasqueError> {
    postcard::to_allocvec(value).map_err(|e| MasqueError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MasqueError> {
    postcard::from_bytes(bytes).map_err(|e| MasqueError::Serialization(e.to_string()))
}
