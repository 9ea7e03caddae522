use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::model::{NewShare, ShareDuration, ShareRecord};

const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("secret_shares");
/// Unique index: path slug -> share id.
const SLUGS: TableDefinition<&str, &str> = TableDefinition::new("secret_share_slugs");

/// Outcome of inserting a new share.
#[derive(Debug, PartialEq)]
pub enum InsertResult {
    Inserted(ShareRecord),
    /// Another share already owns the slug. Nothing was written.
    SlugTaken,
}

/// Outcome of a reveal attempt.
#[derive(Debug, PartialEq)]
pub enum RevealResult {
    /// Share was valid; `read` and `last_read_at` were stamped.
    Revealed(ShareRecord),
    /// Share was valid and read-once; it has been removed.
    Consumed(ShareRecord),
    /// Share missing, expired, or empty.
    Invalid,
}

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SHARES)?;
        write_txn.open_table(SLUGS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Insert a new share. The slug check and both table writes happen in one
    /// write transaction, so concurrent creators cannot both claim a slug.
    pub fn insert(&self, share: NewShare) -> Result<InsertResult> {
        let now = Self::now();
        let record = ShareRecord {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: share.project_id,
            secret_content: share.secret_content,
            iv: share.iv,
            path_slug: share.path_slug,
            read: false,
            read_only_once: share.read_only_once,
            is_password_protected: share.is_password_protected,
            expire_at_value: share.expire_at_value,
            expire_at_unit: share.expire_at_unit,
            expire_at: share.expire_at.timestamp_millis(),
            last_read_at: None,
            created_at: now,
            updated_at: now,
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut slugs = write_txn.open_table(SLUGS)?;
            if slugs.get(record.path_slug.as_str())?.is_some() {
                // Dropping the transaction aborts it.
                return Ok(InsertResult::SlugTaken);
            }
            slugs.insert(record.path_slug.as_str(), record.id.as_str())?;

            let mut shares = write_txn.open_table(SHARES)?;
            shares.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %record.id, slug = %record.path_slug, "stored share");
        Ok(InsertResult::Inserted(record))
    }

    /// True if any share (valid or not) currently owns `slug`.
    pub fn slug_exists(&self, slug: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let slugs = read_txn.open_table(SLUGS)?;
        Ok(slugs.get(slug)?.is_some())
    }

    /// Look up a share by slug without touching its read state.
    pub fn get_by_slug(&self, slug: &str) -> Result<Option<ShareRecord>> {
        let read_txn = self.db.begin_read()?;
        let slugs = read_txn.open_table(SLUGS)?;
        let Some(id) = slugs.get(slug)?.map(|g| g.value().to_owned()) else {
            return Ok(None);
        };
        let shares = read_txn.open_table(SHARES)?;
        let raw: Option<Vec<u8>> = shares.get(id.as_str())?.map(|g| g.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// All shares owned by `project_id`, newest first.
    pub fn list_by_project(&self, project_id: &str) -> Result<Vec<ShareRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SHARES)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            let record = decode(v.value())?;
            if record.project_id == project_id {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Validate and consume a share in a single write transaction.
    ///
    /// Read-once shares are removed (together with their slug) before the
    /// transaction commits, so at most one caller ever sees `Consumed`.
    pub fn reveal(&self, slug: &str) -> Result<RevealResult> {
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let result = {
            let mut slugs = write_txn.open_table(SLUGS)?;
            let mut shares = write_txn.open_table(SHARES)?;

            let id: Option<String> = slugs.get(slug)?.map(|g| g.value().to_owned());
            let raw: Option<Vec<u8>> = match id.as_deref() {
                Some(id) => shares.get(id)?.map(|g| g.value().to_vec()),
                None => None,
            };

            match raw {
                None => RevealResult::Invalid,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if !record.is_valid(now) {
                        RevealResult::Invalid
                    } else if record.read_only_once {
                        shares.remove(record.id.as_str())?;
                        slugs.remove(slug)?;
                        debug!(id = %record.id, "consumed read-once share");
                        RevealResult::Consumed(record)
                    } else {
                        record.read = true;
                        record.last_read_at = Some(now);
                        record.updated_at = now;
                        let updated = encode(&record)?;
                        shares.insert(record.id.as_str(), updated.as_slice())?;
                        RevealResult::Revealed(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Replace the expiry fields of a share owned by `project_id`.
    /// Returns `None` if no such share exists in that project.
    pub fn update_duration(
        &self,
        id: &str,
        project_id: &str,
        duration: ShareDuration,
    ) -> Result<Option<ShareRecord>> {
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(SHARES)?;
            let raw: Option<Vec<u8>> = table.get(id)?.map(|g| g.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.project_id != project_id {
                        None
                    } else {
                        record.expire_at_value = duration.expire_at_value;
                        record.expire_at_unit = duration.expire_at_unit;
                        record.expire_at = duration.expire_at.timestamp_millis();
                        record.updated_at = now;
                        let updated = encode(&record)?;
                        table.insert(id, updated.as_slice())?;
                        Some(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Hard-delete a share owned by `project_id`, returning the removed row.
    pub fn delete(&self, id: &str, project_id: &str) -> Result<Option<ShareRecord>> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut shares = write_txn.open_table(SHARES)?;
            let raw: Option<Vec<u8>> = shares.get(id)?.map(|g| g.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let record = decode(&bytes)?;
                    if record.project_id != project_id {
                        None
                    } else {
                        shares.remove(id)?;
                        let mut slugs = write_txn.open_table(SLUGS)?;
                        slugs.remove(record.path_slug.as_str())?;
                        Some(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Remove every share owned by `project_id`. Returns the number removed.
    pub fn purge_project(&self, project_id: &str) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut shares = write_txn.open_table(SHARES)?;
            let mut doomed: Vec<(String, String)> = Vec::new();
            for item in shares.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.project_id == project_id {
                    doomed.push((k.value().to_owned(), record.path_slug));
                }
            }

            let mut slugs = write_txn.open_table(SLUGS)?;
            for (id, slug) in &doomed {
                shares.remove(id.as_str())?;
                slugs.remove(slug.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;

        if removed > 0 {
            debug!(project_id, removed, "purged project shares");
        }
        Ok(removed)
    }
}

fn encode(record: &ShareRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<ShareRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}
