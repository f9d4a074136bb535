//! Postgres store implementations.
//!
//! Schema expectations (owned by the surrounding application's migrations):
//!
//! - `accounts(id uuid pk, email text unique, password_hash text,
//!   mfa_state text, mfa_secret text)`
//! - `account_recovery_codes(account_id uuid, code_hash text, position int)`
//! - `auth_sessions(token_hash bytea pk, account_id uuid, kind text,
//!   issued_at timestamptz, expires_at timestamptz, last_seen_at timestamptz)`
//! - `trusted_devices(id uuid pk, account_id uuid, token_hash bytea,
//!   device_name text, browser_label text, os_label text, origin_ip text,
//!   created_at timestamptz, last_used_at timestamptz, expires_at timestamptz)`
//!
//! Timestamps are bound from the injected clock rather than `NOW()` so the
//! same code path is exercised under test clocks and production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    AccountRecord, CredentialStore, MfaStatus, SessionRecord, SessionStore, StoreError,
    TrustedDeviceRecord, TrustedDeviceRepo,
};
use crate::session::SessionKind;

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[derive(Clone, Debug)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> AccountRecord {
    let state: String = row.get("mfa_state");
    let secret: Option<String> = row.get("mfa_secret");
    AccountRecord {
        id: row.get("id"),
        identifier: row.get("email"),
        password_hash: row.get("password_hash"),
        mfa: MfaStatus::from_parts(&state, secret),
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let query = r"
            SELECT id, email, password_hash, mfa_state, mfa_secret
            FROM accounts
            WHERE lower(email) = lower($1)
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_by_id(&self, account_id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let query = r"
            SELECT id, email, password_hash, mfa_state, mfa_secret
            FROM accounts
            WHERE id = $1
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn set_mfa_status(
        &self,
        account_id: Uuid,
        status: &MfaStatus,
    ) -> Result<(), StoreError> {
        let (state, secret) = status.as_parts();
        let query = r"
            UPDATE accounts
            SET mfa_state = $2,
                mfa_secret = $3
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(state)
            .bind(secret)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        account_id: Uuid,
        hashes: &[String],
    ) -> Result<(), StoreError> {
        // One transaction: the old batch disappears in the same instant the
        // new one becomes valid.
        let mut tx = self.pool.begin().await?;

        let query = "DELETE FROM account_recovery_codes WHERE account_id = $1";
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await?;

        let query = r"
            INSERT INTO account_recovery_codes (account_id, code_hash, position)
            VALUES ($1, $2, $3)
        ";
        for (position, hash) in hashes.iter().enumerate() {
            sqlx::query(query)
                .bind(account_id)
                .bind(hash)
                .bind(i32::try_from(position).unwrap_or(i32::MAX))
                .execute(&mut *tx)
                .instrument(query_span("INSERT", query))
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn recovery_code_hashes(&self, account_id: Uuid) -> Result<Vec<String>, StoreError> {
        let query = r"
            SELECT code_hash
            FROM account_recovery_codes
            WHERE account_id = $1
            ORDER BY position
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("code_hash"))
            .collect())
    }

    async fn remove_recovery_code(
        &self,
        account_id: Uuid,
        hash: &str,
    ) -> Result<bool, StoreError> {
        // Conditional delete: of two concurrent submissions of the same
        // code, exactly one sees a row come back.
        let query = r"
            DELETE FROM account_recovery_codes
            WHERE account_id = $1
              AND code_hash = $2
            RETURNING account_id
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(row.is_some())
    }
}

#[derive(Clone, Debug)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow, kind: SessionKind) -> SessionRecord {
    SessionRecord {
        token_hash: row.get("token_hash"),
        account_id: row.get("account_id"),
        kind,
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        last_seen_at: row.get("last_seen_at"),
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert(&self, record: SessionRecord) -> Result<bool, StoreError> {
        let query = r"
            INSERT INTO auth_sessions
                (token_hash, account_id, kind, issued_at, expires_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(&record.token_hash)
            .bind(record.account_id)
            .bind(record.kind.as_str())
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(record.last_seen_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let query = r"
            SELECT token_hash, account_id, issued_at, expires_at, last_seen_at
            FROM auth_sessions
            WHERE token_hash = $1
              AND kind = 'mfa_pending'
              AND expires_at > $2
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.map(|row| session_from_row(&row, SessionKind::MfaPending)))
    }

    async fn take_pending(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        // Single conditional delete; concurrent callers race on the row and
        // at most one gets it back.
        let query = r"
            DELETE FROM auth_sessions
            WHERE token_hash = $1
              AND kind = 'mfa_pending'
              AND expires_at > $2
            RETURNING token_hash, account_id, issued_at, expires_at, last_seen_at
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(row.map(|row| session_from_row(&row, SessionKind::MfaPending)))
    }

    async fn find_full(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        // Touch last_seen_at in the same statement; expires_at never moves.
        let query = r"
            UPDATE auth_sessions
            SET last_seen_at = $2
            WHERE token_hash = $1
              AND kind = 'full'
              AND expires_at > $2
            RETURNING token_hash, account_id, issued_at, expires_at, last_seen_at
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(row.map(|row| session_from_row(&row, SessionKind::Full)))
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = "DELETE FROM auth_sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn delete_all_for(
        &self,
        account_id: Uuid,
        kind: SessionKind,
    ) -> Result<u64, StoreError> {
        let query = "DELETE FROM auth_sessions WHERE account_id = $1 AND kind = $2";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone, Debug)]
pub struct PostgresTrustedDeviceRepo {
    pool: PgPool,
}

impl PostgresTrustedDeviceRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn device_from_row(row: &sqlx::postgres::PgRow) -> TrustedDeviceRecord {
    TrustedDeviceRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        token_hash: row.get("token_hash"),
        device_name: row.get("device_name"),
        browser_label: row.get("browser_label"),
        os_label: row.get("os_label"),
        origin_ip: row.get("origin_ip"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
        expires_at: row.get("expires_at"),
    }
}

#[async_trait]
impl TrustedDeviceRepo for PostgresTrustedDeviceRepo {
    async fn insert(&self, record: TrustedDeviceRecord) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO trusted_devices
                (id, account_id, token_hash, device_name, browser_label, os_label,
                 origin_ip, created_at, last_used_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        sqlx::query(query)
            .bind(record.id)
            .bind(record.account_id)
            .bind(&record.token_hash)
            .bind(&record.device_name)
            .bind(&record.browser_label)
            .bind(&record.os_label)
            .bind(&record.origin_ip)
            .bind(record.created_at)
            .bind(record.last_used_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TrustedDeviceRecord>, StoreError> {
        let query = r"
            SELECT id, account_id, token_hash, device_name, browser_label, os_label,
                   origin_ip, created_at, last_used_at, expires_at
            FROM trusted_devices
            WHERE account_id = $1
              AND token_hash = $2
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(device_from_row))
    }

    async fn touch_last_used(
        &self,
        device_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = "UPDATE trusted_devices SET last_used_at = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(device_id)
            .bind(when)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDeviceRecord>, StoreError> {
        let query = r"
            SELECT id, account_id, token_hash, device_name, browser_label, os_label,
                   origin_ip, created_at, last_used_at, expires_at
            FROM trusted_devices
            WHERE account_id = $1
            ORDER BY created_at
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(device_from_row).collect())
    }

    async fn delete(&self, account_id: Uuid, device_id: Uuid) -> Result<bool, StoreError> {
        let query = r"
            DELETE FROM trusted_devices
            WHERE account_id = $1
              AND id = $2
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(row.is_some())
    }

    async fn delete_all(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM trusted_devices WHERE account_id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }
}
