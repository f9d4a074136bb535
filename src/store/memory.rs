//! In-memory store implementations for tests and lightweight embedding.
//!
//! Every method takes one short-lived mutex, so the conditional operations
//! (`remove_recovery_code`, `take_pending`) are atomic by construction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    AccountRecord, CredentialStore, MfaStatus, SessionRecord, SessionStore, StoreError,
    TrustedDeviceRecord, TrustedDeviceRepo,
};
use crate::session::SessionKind;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Credential store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    accounts: Mutex<HashMap<Uuid, AccountRecord>>,
    recovery_codes: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account; test/bootstrap helper.
    pub fn insert_account(&self, record: AccountRecord) {
        lock(&self.accounts).insert(record.id, record);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        Ok(lock(&self.accounts)
            .values()
            .find(|record| record.identifier.eq_ignore_ascii_case(identifier))
            .cloned())
    }

    async fn find_by_id(&self, account_id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        Ok(lock(&self.accounts).get(&account_id).cloned())
    }

    async fn set_mfa_status(
        &self,
        account_id: Uuid,
        status: &MfaStatus,
    ) -> Result<(), StoreError> {
        if let Some(record) = lock(&self.accounts).get_mut(&account_id) {
            record.mfa = status.clone();
        }
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        account_id: Uuid,
        hashes: &[String],
    ) -> Result<(), StoreError> {
        lock(&self.recovery_codes).insert(account_id, hashes.to_vec());
        Ok(())
    }

    async fn recovery_code_hashes(&self, account_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.recovery_codes)
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_recovery_code(
        &self,
        account_id: Uuid,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let mut codes = lock(&self.recovery_codes);
        let Some(hashes) = codes.get_mut(&account_id) else {
            return Ok(false);
        };
        let Some(position) = hashes.iter().position(|stored| stored == hash) else {
            return Ok(false);
        };
        hashes.remove(position);
        Ok(true)
    }
}

/// Session store backed by process memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, record: SessionRecord) -> Result<bool, StoreError> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&record.token_hash) {
            return Ok(false);
        }
        sessions.insert(record.token_hash.clone(), record);
        Ok(true)
    }

    async fn find_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(lock(&self.sessions)
            .get(token_hash)
            .filter(|record| record.kind == SessionKind::MfaPending && record.expires_at > now)
            .cloned())
    }

    async fn take_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let mut sessions = lock(&self.sessions);
        let is_pending = sessions
            .get(token_hash)
            .is_some_and(|record| record.kind == SessionKind::MfaPending);
        if !is_pending {
            return Ok(None);
        }
        let record = sessions.remove(token_hash);
        Ok(record.filter(|record| record.expires_at > now))
    }

    async fn find_full(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let mut sessions = lock(&self.sessions);
        let Some(record) = sessions.get_mut(token_hash) else {
            return Ok(None);
        };
        if record.kind != SessionKind::Full || record.expires_at <= now {
            return Ok(None);
        }
        record.last_seen_at = now;
        Ok(Some(record.clone()))
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        lock(&self.sessions).remove(token_hash);
        Ok(())
    }

    async fn delete_all_for(
        &self,
        account_id: Uuid,
        kind: SessionKind,
    ) -> Result<u64, StoreError> {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, record| record.account_id != account_id || record.kind != kind);
        Ok((before - sessions.len()) as u64)
    }
}

/// Trusted-device repository backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryTrustedDeviceRepo {
    devices: Mutex<HashMap<Uuid, TrustedDeviceRecord>>,
}

impl MemoryTrustedDeviceRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustedDeviceRepo for MemoryTrustedDeviceRepo {
    async fn insert(&self, record: TrustedDeviceRecord) -> Result<(), StoreError> {
        lock(&self.devices).insert(record.id, record);
        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TrustedDeviceRecord>, StoreError> {
        Ok(lock(&self.devices)
            .values()
            .find(|record| record.account_id == account_id && record.token_hash == token_hash)
            .cloned())
    }

    async fn touch_last_used(
        &self,
        device_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(record) = lock(&self.devices).get_mut(&device_id) {
            record.last_used_at = when;
        }
        Ok(())
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDeviceRecord>, StoreError> {
        let mut devices: Vec<TrustedDeviceRecord> = lock(&self.devices)
            .values()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect();
        devices.sort_by_key(|record| record.created_at);
        Ok(devices)
    }

    async fn delete(&self, account_id: Uuid, device_id: Uuid) -> Result<bool, StoreError> {
        let mut devices = lock(&self.devices);
        let matches = devices
            .get(&device_id)
            .is_some_and(|record| record.account_id == account_id);
        if !matches {
            return Ok(false);
        }
        devices.remove(&device_id);
        Ok(true)
    }

    async fn delete_all(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|_, record| record.account_id != account_id);
        Ok((before - devices.len()) as u64)
    }
}
