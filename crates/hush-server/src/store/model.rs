use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Unit of the user-facing expiry duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryUnit {
    Min,
    Hour,
    Day,
}

impl ExpiryUnit {
    pub fn seconds(self) -> i64 {
        match self {
            Self::Min => 60,
            Self::Hour => 3600,
            Self::Day => 86400,
        }
    }

    /// Absolute expiry for `value` units counted from `now`.
    /// `None` when the result falls outside the representable range.
    pub fn expire_at(self, now: DateTime<Utc>, value: u32) -> Option<DateTime<Utc>> {
        now.checked_add_signed(Duration::seconds(self.seconds() * i64::from(value)))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl std::fmt::Display for ExpiryUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored in redb as bincode-encoded bytes, keyed by `id`.
/// `secret_content` is ciphertext produced by the creator; the server never
/// holds the key. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: String,
    pub project_id: String,
    /// Base64 ciphertext.
    pub secret_content: String,
    /// Base64 IV used by the creator.
    pub iv: String,
    pub path_slug: String,
    pub read: bool,
    pub read_only_once: bool,
    pub is_password_protected: bool,
    pub expire_at_value: u32,
    pub expire_at_unit: ExpiryUnit,
    pub expire_at: i64,
    pub last_read_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ShareRecord {
    /// A share is revealable while it has content and `now` is strictly
    /// before its expiry instant.
    pub fn is_valid(&self, now: i64) -> bool {
        !self.secret_content.is_empty() && now < self.expire_at
    }
}

/// Fields supplied by the creator when storing a new share.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub project_id: String,
    pub secret_content: String,
    pub iv: String,
    pub path_slug: String,
    pub expire_at_value: u32,
    pub expire_at_unit: ExpiryUnit,
    pub expire_at: DateTime<Utc>,
    pub is_password_protected: bool,
    pub read_only_once: bool,
}

/// Replacement expiry for an existing share.
#[derive(Debug, Clone, Copy)]
pub struct ShareDuration {
    pub expire_at_value: u32,
    pub expire_at_unit: ExpiryUnit,
    pub expire_at: DateTime<Utc>,
}

/// API view of a share. Listing endpoints blank `secret_content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretShare {
    pub id: String,
    pub project_id: String,
    pub secret_content: String,
    pub iv: String,
    pub path_slug: String,
    pub read: bool,
    pub read_only_once: bool,
    pub is_password_protected: bool,
    pub expire_at_value: u32,
    pub expire_at_unit: ExpiryUnit,
    pub expire_at_date: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretShare {
    /// Drop the ciphertext before the record leaves a management endpoint.
    pub fn redacted(mut self) -> Self {
        self.secret_content.clear();
        self
    }
}

impl From<ShareRecord> for SecretShare {
    fn from(r: ShareRecord) -> Self {
        Self {
            id: r.id,
            project_id: r.project_id,
            secret_content: r.secret_content,
            iv: r.iv,
            path_slug: r.path_slug,
            read: r.read,
            read_only_once: r.read_only_once,
            is_password_protected: r.is_password_protected,
            expire_at_value: r.expire_at_value,
            expire_at_unit: r.expire_at_unit,
            expire_at_date: from_millis(r.expire_at),
            last_read_at: r.last_read_at.map(from_millis),
            created_at: from_millis(r.created_at),
            updated_at: from_millis(r.updated_at),
        }
    }
}

/// What a viewer receives from a successful reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedSecret {
    pub cipher: String,
    pub iv: String,
    pub is_password_protected: bool,
}

impl From<&ShareRecord> for RevealedSecret {
    fn from(r: &ShareRecord) -> Self {
        Self {
            cipher: r.secret_content.clone(),
            iv: r.iv.clone(),
            is_password_protected: r.is_password_protected,
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
