//! Storage contracts consumed by the auth service.
//!
//! The credential store is owned by the surrounding application; sessions
//! and trusted devices are owned here. All three are traits so production
//! runs on Postgres ([`postgres`]) while tests and embedders run in memory
//! ([`memory`]). The conditional operations (`remove_recovery_code`,
//! `take_pending`) are the atomicity seams the flow relies on: at most one
//! concurrent caller wins them.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::session::SessionKind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// MFA state for an account, as a tagged variant rather than a pair of
/// nullable columns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MfaStatus {
    Disabled,
    /// Secret provisioned but never confirmed by a valid code; does not
    /// gate login.
    Pending { secret: String },
    Enabled { secret: String },
}

impl MfaStatus {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    pub(crate) fn as_parts(&self) -> (&'static str, Option<&str>) {
        match self {
            Self::Disabled => ("disabled", None),
            Self::Pending { secret } => ("pending", Some(secret)),
            Self::Enabled { secret } => ("enabled", Some(secret)),
        }
    }

    pub(crate) fn from_parts(state: &str, secret: Option<String>) -> Self {
        match (state.trim(), secret) {
            ("pending", Some(secret)) => Self::Pending { secret },
            ("enabled", Some(secret)) => Self::Enabled { secret },
            _ => Self::Disabled,
        }
    }
}

/// One account's credential material.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub id: Uuid,
    /// Normalized (lowercased) unique identifier, an email address.
    pub identifier: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub mfa: MfaStatus,
}

/// A pending or full session, keyed by token hash.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub account_id: Uuid,
    pub kind: SessionKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A trusted device; the raw token never appears here.
#[derive(Clone, Debug)]
pub struct TrustedDeviceRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub device_name: String,
    pub browser_label: String,
    pub os_label: String,
    pub origin_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Account credential persistence, owned by the surrounding application.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by normalized identifier; the match is case-insensitive.
    async fn find_by_identifier(&self, identifier: &str)
        -> Result<Option<AccountRecord>, StoreError>;

    async fn find_by_id(&self, account_id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// Replace the account's MFA status (and secret) in one update.
    async fn set_mfa_status(&self, account_id: Uuid, status: &MfaStatus)
        -> Result<(), StoreError>;

    /// Replace the stored recovery-code hashes wholesale.
    async fn replace_recovery_codes(
        &self,
        account_id: Uuid,
        hashes: &[String],
    ) -> Result<(), StoreError>;

    /// Stored hashes in insertion order.
    async fn recovery_code_hashes(&self, account_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Remove one hash if still present. Returns whether this caller
    /// removed it; concurrent callers get `false`.
    async fn remove_recovery_code(&self, account_id: Uuid, hash: &str)
        -> Result<bool, StoreError>;
}

/// Pending/full session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Returns `false` on a token-hash collision so
    /// the issuer can retry with a fresh token.
    async fn insert(&self, record: SessionRecord) -> Result<bool, StoreError>;

    /// Non-consuming lookup of a live pending session.
    async fn find_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Atomically remove and return a live pending session. At most one
    /// concurrent caller receives the record.
    async fn take_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Look up a live full session, updating `last_seen_at` to `now`
    /// without touching `expires_at`.
    async fn find_full(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Delete by token hash; idempotent.
    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError>;

    /// Delete every session of `kind` for an account, returning the count.
    async fn delete_all_for(&self, account_id: Uuid, kind: SessionKind)
        -> Result<u64, StoreError>;
}

/// Trusted-device persistence.
#[async_trait]
pub trait TrustedDeviceRepo: Send + Sync {
    async fn insert(&self, record: TrustedDeviceRecord) -> Result<(), StoreError>;

    async fn find_by_token_hash(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TrustedDeviceRecord>, StoreError>;

    /// Update `last_used_at` only; expiry is fixed at issuance.
    async fn touch_last_used(&self, device_id: Uuid, when: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDeviceRecord>, StoreError>;

    /// Returns whether a device was deleted.
    async fn delete(&self, account_id: Uuid, device_id: Uuid) -> Result<bool, StoreError>;

    /// Delete all devices for an account, returning the count.
    async fn delete_all(&self, account_id: Uuid) -> Result<u64, StoreError>;
}
