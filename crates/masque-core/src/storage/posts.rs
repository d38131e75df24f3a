//! Post Storage - anonymous posts keyed by ULID
//!
//! ULID keys sort by creation time, so iterating the table backwards yields
//! posts newest first.

use crate::error::MasqueError;
use crate::types::{AnonymousPost, PersonaId, PostId};
use redb::{ReadableTable, Table, TableDefinition};

use super::{decode, encode, Storage};

/// Table for posts (key: ULID string, value: serialized AnonymousPost)
pub(crate) const POSTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("posts");

/// What [`Storage::retire_post`] did with a post
#[derive(Debug)]
pub enum RetiredPost {
    Deleted(AnonymousPost),
    Kept(AnonymousPost),
}

/// Apply `update` to each post by `persona_id` inside an open write
/// transaction. Returns how many posts were changed.
pub(super) fn update_authored<F>(
    table: &mut Table<&'static str, &'static [u8]>,
    persona_id: &PersonaId,
    update: &mut F,
) -> Result<usize, MasqueError>
where
    F: FnMut(&mut AnonymousPost) -> bool,
{
    let mut authored = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let post: AnonymousPost = decode(value.value())?;
        if post.persona_id == *persona_id {
            authored.push((key.value().to_string(), post));
        }
    }

    let mut changed = 0;
    for (key, mut post) in authored {
        if update(&mut post) {
            let serialized = encode(&post)?;
            table.insert(key.as_str(), serialized.as_slice())?;
            changed += 1;
        }
    }
    Ok(changed)
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Post Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a post, overwriting any post with the same id.
    pub fn save_post(&self, post: &AnonymousPost) -> Result<(), MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(POSTS_TABLE)?;
            let serialized = encode(post)?;
            let key = post.id.to_string_repr();
            table.insert(key.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a post by id, regardless of expiry or moderation state.
    pub fn load_post(&self, id: &PostId) -> Result<Option<AnonymousPost>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(POSTS_TABLE)?;
        let key = id.to_string_repr();

        match table.get(key.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a post in one write transaction.
    ///
    /// Missing posts yield `NotFound`. If `update` fails nothing is written.
    pub fn update_post_with<F, T>(&self, id: &PostId, update: F) -> Result<T, MasqueError>
    where
        F: FnOnce(&mut AnonymousPost) -> Result<T, MasqueError>,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(POSTS_TABLE)?;
            let key = id.to_string_repr();

            let stored = table.get(key.as_str())?.map(|v| v.value().to_vec());
            let mut post: AnonymousPost = match stored {
                Some(bytes) => decode(&bytes)?,
                None => return Err(MasqueError::NotFound("post".to_string())),
            };

            let outcome = update(&mut post)?;
            let serialized = encode(&post)?;
            table.insert(key.as_str(), serialized.as_slice())?;
            outcome
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Delete a post unless `keep` decides to hold on to it, in one write
    /// transaction.
    ///
    /// `keep` may modify the post; a kept post is written back. Missing
    /// posts yield `None`. If `keep` fails nothing is written.
    pub fn retire_post<F>(&self, id: &PostId, keep: F) -> Result<Option<RetiredPost>, MasqueError>
    where
        F: FnOnce(&mut AnonymousPost) -> Result<bool, MasqueError>,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let retired = {
            let mut table = write_txn.open_table(POSTS_TABLE)?;
            let key = id.to_string_repr();

            let stored = table.get(key.as_str())?.map(|v| v.value().to_vec());
            match stored {
                Some(bytes) => {
                    let mut post: AnonymousPost = decode(&bytes)?;
                    if keep(&mut post)? {
                        let serialized = encode(&post)?;
                        table.insert(key.as_str(), serialized.as_slice())?;
                        Some(RetiredPost::Kept(post))
                    } else {
                        table.remove(key.as_str())?;
                        Some(RetiredPost::Deleted(post))
                    }
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(retired)
    }

    /// All posts, newest first.
    pub fn list_posts(&self) -> Result<Vec<AnonymousPost>, MasqueError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(POSTS_TABLE)?;

        let mut posts = Vec::new();
        for entry in table.iter()?.rev() {
            let (_, value) = entry?;
            posts.push(decode(value.value())?);
        }
        Ok(posts)
    }

    /// Apply `update` to every post authored by `persona_id` in one write
    /// transaction. Returns how many posts were changed.
    pub fn update_posts_by_persona<F>(
        &self,
        persona_id: &PersonaId,
        mut update: F,
    ) -> Result<usize, MasqueError>
    where
        F: FnMut(&mut AnonymousPost) -> bool,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let changed = {
            let mut table = write_txn.open_table(POSTS_TABLE)?;
            update_authored(&mut table, persona_id, &mut update)?
        };
        write_txn.commit()?;
        Ok(changed)
    }

    /// Hard-delete every post matching `predicate`. Returns the removed posts.
    pub fn purge_posts<F>(&self, predicate: F) -> Result<Vec<AnonymousPost>, MasqueError>
    where
        F: Fn(&AnonymousPost) -> bool,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let purged = {
            let mut table = write_txn.open_table(POSTS_TABLE)?;

            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let post: AnonymousPost = decode(value.value())?;
                if predicate(&post) {
                    doomed.push((key.value().to_string(), post));
                }
            }

            let mut purged = Vec::with_capacity(doomed.len());
            for (key, post) in doomed {
                table.remove(key.as_str())?;
                purged.push(post);
            }
            purged
        };
        write_txn.commit()?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Engagement, IntegrityRecord, IntegrityStatus, ModerationState, PostType,
    };
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        (storage, temp_dir)
    }

    fn post_by(persona_id: PersonaId, content: &str) -> AnonymousPost {
        AnonymousPost {
            id: PostId::new(),
            persona_id,
            content: Some(content.to_string()),
            media: Vec::new(),
            post_type: PostType::Text,
            created_at: 1_700_000_000,
            disappears_at: None,
            engagement: Engagement::default(),
            integrity: IntegrityRecord {
                content_hash: "00".repeat(32),
                signature: None,
                signer_public_key: None,
                status: IntegrityStatus::Unverified,
            },
            moderation: ModerationState::default(),
        }
    }

    #[test]
    fn test_save_and_load_post() {
        let (storage, _temp) = create_test_storage();
        let post = post_by(PersonaId::from_bytes([1; 16]), "hello");

        storage.save_post(&post).unwrap();
        assert_eq!(storage.load_post(&post.id).unwrap(), Some(post));
    }

    #[test]
    fn test_list_posts_newest_first() {
        let (storage, _temp) = create_test_storage();
        let author = PersonaId::from_bytes([1; 16]);

        let mut ids = Vec::new();
        for i in 0..3 {
            let post = post_by(author, &format!("post {}", i));
            ids.push(post.id);
            storage.save_post(&post).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let listed: Vec<PostId> = storage.list_posts().unwrap().iter().map(|p| p.id).collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_update_missing_post_is_not_found() {
        let (storage, _temp) = create_test_storage();
        let result = storage.update_post_with(&PostId::new(), |_| Ok(()));
        assert!(matches!(result, Err(MasqueError::NotFound(_))));
    }

    #[test]
    fn test_failed_update_is_rolled_back() {
        let (storage, _temp) = create_test_storage();
        let post = post_by(PersonaId::from_bytes([1; 16]), "hello");
        storage.save_post(&post).unwrap();

        let result: Result<(), _> = storage.update_post_with(&post.id, |p| {
            p.content = Some("tampered".to_string());
            Err(MasqueError::Validation("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(storage.load_post(&post.id).unwrap(), Some(post));
    }

    #[test]
    fn test_update_posts_by_persona_touches_only_that_author() {
        let (storage, _temp) = create_test_storage();
        let alice = PersonaId::from_bytes([1; 16]);
        let bob = PersonaId::from_bytes([2; 16]);
        storage.save_post(&post_by(alice, "a1")).unwrap();
        storage.save_post(&post_by(alice, "a2")).unwrap();
        let bobs = post_by(bob, "b1");
        storage.save_post(&bobs).unwrap();

        let changed = storage
            .update_posts_by_persona(&alice, |p| {
                p.content = None;
                true
            })
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(storage.load_post(&bobs.id).unwrap(), Some(bobs));
    }

    #[test]
    fn test_purge_and_delete() {
        let (storage, _temp) = create_test_storage();
        let author = PersonaId::from_bytes([1; 16]);
        let keep = post_by(author, "keep");
        let stale = post_by(author, "stale");
        storage.save_post(&keep).unwrap();
        storage.save_post(&stale).unwrap();

        let purged = storage
            .purge_posts(|p| p.content.as_deref() == Some("stale"))
            .unwrap();
        assert_eq!(purged.len(), 1);
        assert!(storage.load_post(&stale.id).unwrap().is_none());

        assert!(matches!(
            storage.retire_post(&keep.id, |_| Ok(false)).unwrap(),
            Some(RetiredPost::Deleted(_))
        ));
        assert!(storage.retire_post(&keep.id, |_| Ok(false)).unwrap().is_none());
    }

    #[test]
    fn test_retire_keeps_and_rolls_back() {
        let (storage, _temp) = create_test_storage();
        let post = post_by(PersonaId::from_bytes([2; 16]), "held");
        storage.save_post(&post).unwrap();

        let kept = storage
            .retire_post(&post.id, |p| {
                p.content = Some("hidden".to_string());
                Ok(true)
            })
            .unwrap();
        assert!(matches!(kept, Some(RetiredPost::Kept(_))));
        let stored = storage.load_post(&post.id).unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("hidden"));

        let result = storage.retire_post(&post.id, |_| {
            Err(MasqueError::NotAuthorized("post".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(storage.load_post(&post.id).unwrap(), Some(stored));
    }
}
