//! Lifecycle rules for shared secrets: creation, validity, reveal and
//! expiry changes. The service only ever handles ciphertext.

use tracing::info;

use crate::error::SharingError;
use crate::store::{
    InsertResult, NewShare, RevealResult, RevealedSecret, SecretShare, ShareDuration, Store,
};

pub type SharingResult<T> = Result<T, SharingError>;

#[derive(Clone)]
pub struct SharingService {
    store: Store,
}

impl SharingService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Store a pre-encrypted share. Fails with `PathAlreadyTaken` when the
    /// slug is in use, whether caught by the lookup or by the insert itself.
    pub fn create(&self, mut share: NewShare) -> SharingResult<SecretShare> {
        share.project_id = required(&share.project_id, "Project id is required field")?;
        share.secret_content =
            required(&share.secret_content, "Secret Content is required field")?;
        share.path_slug = required(&share.path_slug, "Path slug is required field")?;
        share.iv = required(&share.iv, "IV is required field")?;

        if self.is_path_taken(&share.path_slug)? {
            return Err(SharingError::PathAlreadyTaken(share.path_slug));
        }

        let slug = share.path_slug.clone();
        match self.store.insert(share)? {
            InsertResult::Inserted(record) => {
                info!(
                    id = %record.id,
                    project_id = %record.project_id,
                    read_only_once = record.read_only_once,
                    "audit: secret_sharing.create"
                );
                Ok(record.into())
            }
            InsertResult::SlugTaken => Err(SharingError::PathAlreadyTaken(slug)),
        }
    }

    /// Every share of a project, newest first, with content blanked.
    pub fn list(&self, project_id: &str) -> SharingResult<Vec<SecretShare>> {
        let records = self.store.list_by_project(project_id)?;
        Ok(records
            .into_iter()
            .map(|r| SecretShare::from(r).redacted())
            .collect())
    }

    pub fn is_path_taken(&self, slug: &str) -> SharingResult<bool> {
        Ok(self.store.slug_exists(slug)?)
    }

    pub fn is_valid(&self, slug: &str) -> SharingResult<bool> {
        let now = Store::now();
        Ok(self
            .store
            .get_by_slug(slug)?
            .is_some_and(|r| r.is_valid(now)))
    }

    /// Hand out the ciphertext of a valid share. Read-once shares are deleted
    /// by the same store transaction that validated them.
    pub fn reveal(&self, slug: &str) -> SharingResult<RevealedSecret> {
        match self.store.reveal(slug)? {
            RevealResult::Revealed(record) => {
                info!(id = %record.id, "audit: secret_sharing.reveal");
                Ok(RevealedSecret::from(&record))
            }
            RevealResult::Consumed(record) => {
                info!(id = %record.id, "audit: secret_sharing.consume");
                Ok(RevealedSecret::from(&record))
            }
            RevealResult::Invalid => Err(SharingError::InvalidOrExpiredSecret),
        }
    }

    /// Overwrite the expiry fields of a share; content, slug and read state
    /// are left alone.
    pub fn update_duration(
        &self,
        id: &str,
        project_id: &str,
        duration: ShareDuration,
    ) -> SharingResult<SecretShare> {
        let record = self
            .store
            .update_duration(id, project_id, duration)?
            .ok_or(SharingError::NotFound)?;
        info!(
            id = %record.id,
            expire_at_value = record.expire_at_value,
            expire_at_unit = %record.expire_at_unit,
            "audit: secret_sharing.update"
        );
        Ok(SecretShare::from(record).redacted())
    }

    pub fn delete(&self, id: &str, project_id: &str) -> SharingResult<SecretShare> {
        let record = self
            .store
            .delete(id, project_id)?
            .ok_or(SharingError::NotFound)?;
        info!(id = %record.id, "audit: secret_sharing.delete");
        Ok(SecretShare::from(record).redacted())
    }

    /// Cascade for the deletion of an owning project.
    pub fn purge_project(&self, project_id: &str) -> SharingResult<usize> {
        let removed = self.store.purge_project(project_id)?;
        info!(project_id, removed, "audit: secret_sharing.purge");
        Ok(removed)
    }
}

fn required(value: &str, message: &str) -> SharingResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SharingError::Validation(message.to_owned()));
    }
    Ok(trimmed.to_owned())
}
