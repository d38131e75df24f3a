//! Verification status of professional users
//!
//! Backs the bundled [`crate::directory::StorageDirectory`]. A deployment
//! with its own user service implements `ProfessionalDirectory` instead and
//! leaves this table empty.

use crate::error::MasqueError;
use crate::types::{UserId, VerificationStatus};
use redb::TableDefinition;

use super::{decode, encode, Storage};

/// Table for user status (key: user id, value: serialized VerificationStatus)
pub(crate) const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

impl Storage {
    /// Record a user's verification status, overwriting any previous value.
    pub fn save_user_status(
        &self,
        user: &UserId,
        status: VerificationStatus,
    ) -> Result<(), MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS_TABLE)?;
            let serialized = encode(&status)?;
            table.insert(user.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Returns `None` for users never recorded.
    pub fn load_user_status(
        &self,
        user: &UserId,
    ) -> Result<Option<VerificationStatus>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;

        match table.get(user.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }
}
