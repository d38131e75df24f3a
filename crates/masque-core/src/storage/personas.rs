//! Persona Storage
//!
//! Manages persistent storage for:
//! - Persona records (owner and salt included; never leave the core)
//! - The owner → persona index used for quota checks and listing

use crate::error::MasqueError;
use crate::mixing::MixingParameters;
use crate::types::{
    AnonymousPost, CryptoMaterial, Persona, PersonaId, Salt, SecuritySettings, StealthAddress,
    UserId,
};
use redb::{ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};

use super::posts::{update_authored, POSTS_TABLE};
use super::{decode, encode, Storage};

/// Table for personas (key: base58 persona id, value: serialized PersonaRecord)
pub(crate) const PERSONAS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("personas");

/// Table for owner index (key: owner user id, value: serialized Vec<PersonaId>)
pub(crate) const OWNER_INDEX_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("persona_owner_index");

/// On-disk form of a [`Persona`]. Crate-private so the owner and salt
/// cannot be serialized anywhere else.
#[derive(Serialize, Deserialize)]
pub(crate) struct PersonaRecord {
    id: PersonaId,
    owner: UserId,
    display_name: String,
    avatar_url: Option<String>,
    public_key_hash: String,
    stealth_address: StealthAddress,
    salt: Salt,
    mixing: MixingParameters,
    is_active: bool,
    default_content_lifespan_hours: Option<u32>,
    security: SecuritySettings,
    created_at: i64,
    updated_at: i64,
    last_switched_at: Option<i64>,
}

impl From<&Persona> for PersonaRecord {
    fn from(p: &Persona) -> Self {
        Self {
            id: p.id,
            owner: p.owner.clone(),
            display_name: p.display_name.clone(),
            avatar_url: p.avatar_url.clone(),
            public_key_hash: p.crypto.public_key_hash.clone(),
            stealth_address: p.crypto.stealth_address.clone(),
            salt: p.crypto.salt.clone(),
            mixing: p.crypto.mixing.clone(),
            is_active: p.is_active,
            default_content_lifespan_hours: p.default_content_lifespan_hours,
            security: p.security,
            created_at: p.created_at,
            updated_at: p.updated_at,
            last_switched_at: p.last_switched_at,
        }
    }
}

impl From<PersonaRecord> for Persona {
    fn from(r: PersonaRecord) -> Self {
        Self {
            id: r.id,
            owner: r.owner,
            display_name: r.display_name,
            avatar_url: r.avatar_url,
            crypto: CryptoMaterial {
                public_key_hash: r.public_key_hash,
                stealth_address: r.stealth_address,
                salt: r.salt,
                mixing: r.mixing,
            },
            is_active: r.is_active,
            default_content_lifespan_hours: r.default_content_lifespan_hours,
            security: r.security,
            created_at: r.created_at,
            updated_at: r.updated_at,
            last_switched_at: r.last_switched_at,
        }
    }
}

fn load_record(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &PersonaId,
) -> Result<Option<Persona>, MasqueError> {
    let key = id.to_base58();
    match table.get(key.as_str())? {
        Some(data) => Ok(Some(decode::<PersonaRecord>(data.value())?.into())),
        None => Ok(None),
    }
}

fn load_index(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    owner: &UserId,
) -> Result<Vec<PersonaId>, MasqueError> {
    match table.get(owner.as_str())? {
        Some(data) => decode(data.value()),
        None => Ok(Vec::new()),
    }
}

fn write_record(
    table: &mut Table<&'static str, &'static [u8]>,
    persona: &Persona,
) -> Result<(), MasqueError> {
    let serialized = encode(&PersonaRecord::from(persona))?;
    let key = persona.id.to_base58();
    table.insert(key.as_str(), serialized.as_slice())?;
    Ok(())
}

fn remove_record(
    personas: &mut Table<&'static str, &'static [u8]>,
    index: &mut Table<&'static str, &'static [u8]>,
    id: &PersonaId,
) -> Result<Option<Persona>, MasqueError> {
    let removed = load_record(personas, id)?;
    if let Some(persona) = &removed {
        personas.remove(id.to_base58().as_str())?;

        let mut ids = load_index(index, &persona.owner)?;
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(persona.owner.as_str())?;
        } else {
            let serialized = encode(&ids)?;
            index.insert(persona.owner.as_str(), serialized.as_slice())?;
        }
    }
    Ok(removed)
}

/// Active personas of the owner listed in `ids`, skipping `exclude`.
fn count_active(
    personas: &impl ReadableTable<&'static str, &'static [u8]>,
    ids: &[PersonaId],
    exclude: Option<&PersonaId>,
) -> Result<usize, MasqueError> {
    let mut active = 0;
    for id in ids.iter().filter(|id| Some(*id) != exclude) {
        if load_record(personas, id)?.is_some_and(|p| p.is_active) {
            active += 1;
        }
    }
    Ok(active)
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Persona Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a new persona if its owner holds fewer than `max_active`
    /// active personas.
    ///
    /// The count and the insert share one write transaction.
    pub fn insert_persona_within_quota(
        &self,
        persona: &Persona,
        max_active: usize,
    ) -> Result<(), MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut personas = write_txn.open_table(PERSONAS_TABLE)?;
            let mut index = write_txn.open_table(OWNER_INDEX_TABLE)?;

            let mut ids = load_index(&index, &persona.owner)?;
            if persona.is_active && count_active(&personas, &ids, None)? >= max_active {
                return Err(MasqueError::QuotaExceeded { limit: max_active });
            }

            write_record(&mut personas, persona)?;
            ids.push(persona.id);
            let serialized = encode(&ids)?;
            index.insert(persona.owner.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a persona by id.
    ///
    /// Returns `None` if no persona exists for the given id.
    pub fn load_persona(&self, id: &PersonaId) -> Result<Option<Persona>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(PERSONAS_TABLE)?;
        load_record(&table, id)
    }

    /// All personas of `owner`, oldest first.
    pub fn list_personas_for_owner(&self, owner: &UserId) -> Result<Vec<Persona>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let personas = read_txn.open_table(PERSONAS_TABLE)?;
        let index = read_txn.open_table(OWNER_INDEX_TABLE)?;

        let mut result = Vec::new();
        for id in load_index(&index, owner)? {
            if let Some(persona) = load_record(&personas, &id)? {
                result.push(persona);
            }
        }
        result.sort_by_key(|p| p.created_at);
        Ok(result)
    }

    pub fn count_active_personas(&self, owner: &UserId) -> Result<usize, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let personas = read_txn.open_table(PERSONAS_TABLE)?;
        let index = read_txn.open_table(OWNER_INDEX_TABLE)?;
        count_active(&personas, &load_index(&index, owner)?, None)
    }

    /// Read-modify-write a persona in one write transaction.
    ///
    /// `update` receives the stored persona and returns its replacement. A
    /// replacement that turns an inactive persona active is subject to the
    /// `max_active` quota. If `update` fails nothing is written.
    pub fn update_persona_with<F>(
        &self,
        id: &PersonaId,
        max_active: usize,
        update: F,
    ) -> Result<Persona, MasqueError>
    where
        F: FnOnce(&Persona) -> Result<Persona, MasqueError>,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let updated = {
            let mut personas = write_txn.open_table(PERSONAS_TABLE)?;
            let index = write_txn.open_table(OWNER_INDEX_TABLE)?;

            let current = load_record(&personas, id)?
                .ok_or_else(|| MasqueError::NotFound("persona".to_string()))?;
            let updated = update(&current)?;
            if updated.id != current.id || updated.owner != current.owner {
                return Err(MasqueError::Validation(
                    "persona id and owner are immutable".to_string(),
                ));
            }

            if updated.is_active && !current.is_active {
                let ids = load_index(&index, &current.owner)?;
                if count_active(&personas, &ids, Some(id))? >= max_active {
                    return Err(MasqueError::QuotaExceeded { limit: max_active });
                }
            }

            write_record(&mut personas, &updated)?;
            updated
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Remove a persona and its index entry.
    ///
    /// Returns the removed persona, or `None` if it did not exist.
    pub fn delete_persona(&self, id: &PersonaId) -> Result<Option<Persona>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let removed = {
            let mut personas = write_txn.open_table(PERSONAS_TABLE)?;
            let mut index = write_txn.open_table(OWNER_INDEX_TABLE)?;
            remove_record(&mut personas, &mut index, id)?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Remove a persona and apply `hide` to each of its posts in one write
    /// transaction. Nothing is written unless both steps succeed.
    ///
    /// Returns the removed persona and how many posts `hide` changed, or
    /// `None` if the persona did not exist.
    pub fn delete_persona_with_posts<F>(
        &self,
        id: &PersonaId,
        mut hide: F,
    ) -> Result<Option<(Persona, usize)>, MasqueError>
    where
        F: FnMut(&mut AnonymousPost) -> bool,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let outcome = {
            let mut personas = write_txn.open_table(PERSONAS_TABLE)?;
            let mut index = write_txn.open_table(OWNER_INDEX_TABLE)?;
            match remove_record(&mut personas, &mut index, id)? {
                Some(persona) => {
                    let mut posts = write_txn.open_table(POSTS_TABLE)?;
                    let hidden = update_authored(&mut posts, id, &mut hide)?;
                    Some((persona, hidden))
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PersonaIdentityGenerator;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        (storage, temp_dir)
    }

    fn persona_for(owner: &str) -> Persona {
        let generated = PersonaIdentityGenerator::generate(0.7, 1_700_000_000).unwrap();
        Persona::new(
            UserId::new(owner),
            generated.display_name.clone(),
            generated.crypto_material(),
            1_700_000_000,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_load_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let persona = persona_for("alice");

        storage.insert_persona_within_quota(&persona, 3).unwrap();
        let loaded = storage.load_persona(&persona.id).unwrap().unwrap();
        assert_eq!(loaded, persona);
        assert!(loaded.owned_by(&UserId::new("alice")));
    }

    #[test]
    fn test_load_nonexistent_persona() {
        let (storage, _temp) = create_test_storage();
        let id = PersonaId::generate().unwrap();
        assert!(storage.load_persona(&id).unwrap().is_none());
    }

    #[test]
    fn test_quota_enforced_per_owner() {
        let (storage, _temp) = create_test_storage();

        for _ in 0..2 {
            storage
                .insert_persona_within_quota(&persona_for("alice"), 2)
                .unwrap();
        }
        let result = storage.insert_persona_within_quota(&persona_for("alice"), 2);
        assert!(matches!(result, Err(MasqueError::QuotaExceeded { limit: 2 })));

        // Another owner is unaffected
        storage
            .insert_persona_within_quota(&persona_for("bob"), 2)
            .unwrap();
        assert_eq!(storage.count_active_personas(&UserId::new("alice")).unwrap(), 2);
        assert_eq!(storage.count_active_personas(&UserId::new("bob")).unwrap(), 1);
    }

    #[test]
    fn test_reactivation_obeys_quota() {
        let (storage, _temp) = create_test_storage();
        let first = persona_for("alice");
        storage.insert_persona_within_quota(&first, 1).unwrap();

        storage
            .update_persona_with(&first.id, 1, |p| {
                let mut p = p.clone();
                p.is_active = false;
                Ok(p)
            })
            .unwrap();

        let second = persona_for("alice");
        storage.insert_persona_within_quota(&second, 1).unwrap();

        let result = storage.update_persona_with(&first.id, 1, |p| {
            let mut p = p.clone();
            p.is_active = true;
            Ok(p)
        });
        assert!(matches!(result, Err(MasqueError::QuotaExceeded { .. })));
        assert!(!storage.load_persona(&first.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let (storage, _temp) = create_test_storage();
        let persona = persona_for("alice");
        storage.insert_persona_within_quota(&persona, 3).unwrap();

        let result = storage.update_persona_with(&persona.id, 3, |_| {
            Err(MasqueError::Validation("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(storage.load_persona(&persona.id).unwrap().unwrap(), persona);
    }

    #[test]
    fn test_update_cannot_change_owner() {
        let (storage, _temp) = create_test_storage();
        let persona = persona_for("alice");
        storage.insert_persona_within_quota(&persona, 3).unwrap();

        let result = storage.update_persona_with(&persona.id, 3, |p| {
            let mut p = p.clone();
            p.owner = UserId::new("mallory");
            Ok(p)
        });
        assert!(matches!(result, Err(MasqueError::Validation(_))));
    }

    #[test]
    fn test_delete_updates_index() {
        let (storage, _temp) = create_test_storage();
        let a = persona_for("alice");
        let b = persona_for("alice");
        storage.insert_persona_within_quota(&a, 3).unwrap();
        storage.insert_persona_within_quota(&b, 3).unwrap();

        let removed = storage.delete_persona(&a.id).unwrap();
        assert_eq!(removed.map(|p| p.id), Some(a.id));
        assert!(storage.delete_persona(&a.id).unwrap().is_none());

        let remaining = storage
            .list_personas_for_owner(&UserId::new("alice"))
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);
    }

    #[test]
    fn test_cascade_failure_keeps_persona() {
        let (storage, _temp) = create_test_storage();
        let persona = persona_for("alice");
        storage.insert_persona_within_quota(&persona, 3).unwrap();

        // An undecodable post makes the post half of the cascade fail
        {
            let db = storage.db_handle();
            let db_guard = db.read();
            let write_txn = db_guard.begin_write().unwrap();
            {
                let mut posts = write_txn.open_table(POSTS_TABLE).unwrap();
                posts.insert("corrupt", [0xffu8; 3].as_slice()).unwrap();
            }
            write_txn.commit().unwrap();
        }

        let result = storage.delete_persona_with_posts(&persona.id, |_| true);
        assert!(result.is_err());
        assert_eq!(storage.load_persona(&persona.id).unwrap().unwrap(), persona);
        assert_eq!(storage.count_active_personas(&UserId::new("alice")).unwrap(), 1);
    }

    #[test]
    fn test_cascade_missing_persona_touches_nothing() {
        let (storage, _temp) = create_test_storage();
        let id = PersonaId::generate().unwrap();
        let mut calls = 0;
        let result = storage
            .delete_persona_with_posts(&id, |_| {
                calls += 1;
                true
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(calls, 0);
    }
}
