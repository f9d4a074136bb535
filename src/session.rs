//! Session issuance: pending-MFA tokens and full session tokens.
//!
//! Flow Overview:
//! - Full session tokens carry no prefix and live for days.
//! - `mfa_pending_` tokens prove password success only, live for minutes,
//!   and are consumed exactly once by MFA verification.
//! - The prefix is a cheap router; the server-side record's kind is
//!   authoritative, so a forged prefix buys nothing.
//!
//! Raw tokens are returned to the caller once; storage sees only SHA-256
//! hashes.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::{SessionRecord, SessionStore, StoreError};

/// Prefix marking pending-MFA tokens.
pub const MFA_PENDING_PREFIX: &str = "mfa_pending_";

const TOKEN_BYTES: usize = 32;
const INSERT_ATTEMPTS: usize = 3;

/// Session kinds used to gate the MFA flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Full session with normal access.
    Full,
    /// Pending session scoped to MFA verification only.
    MfaPending,
}

impl SessionKind {
    /// Classify a raw token by its prefix.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        if token.starts_with(MFA_PENDING_PREFIX) {
            Self::MfaPending
        } else {
            Self::Full
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MfaPending => "mfa_pending",
        }
    }
}

/// Create a new random token (256 bits, URL-safe base64).
///
/// # Errors
/// Returns an error when the system RNG fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch storage.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Mints and resolves the two token kinds.
pub struct SessionIssuer {
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    pending_ttl: Duration,
    session_ttl: Duration,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, config: &AuthConfig) -> Self {
        Self {
            sessions,
            clock,
            pending_ttl: Duration::seconds(config.pending_token_ttl_seconds()),
            session_ttl: Duration::seconds(config.session_ttl_seconds()),
        }
    }

    /// Mint a short-lived pending-MFA token for an account.
    ///
    /// # Errors
    /// Returns an error on RNG or store failure.
    pub async fn issue_pending(&self, account_id: Uuid) -> Result<String, AuthError> {
        self.issue(account_id, SessionKind::MfaPending).await
    }

    /// Mint a full session token for an account.
    ///
    /// # Errors
    /// Returns an error on RNG or store failure.
    pub async fn issue_session(&self, account_id: Uuid) -> Result<String, AuthError> {
        self.issue(account_id, SessionKind::Full).await
    }

    async fn issue(&self, account_id: Uuid, kind: SessionKind) -> Result<String, AuthError> {
        let now = self.clock.now();
        let ttl = match kind {
            SessionKind::Full => self.session_ttl,
            SessionKind::MfaPending => self.pending_ttl,
        };
        for _ in 0..INSERT_ATTEMPTS {
            let token = match kind {
                SessionKind::Full => generate_token()?,
                SessionKind::MfaPending => format!("{MFA_PENDING_PREFIX}{}", generate_token()?),
            };
            let record = SessionRecord {
                token_hash: hash_token(&token),
                account_id,
                kind,
                issued_at: now,
                expires_at: now + ttl,
                last_seen_at: now,
            };
            if self.sessions.insert(record).await? {
                return Ok(token);
            }
        }
        Err(AuthError::Internal(anyhow!(
            "failed to generate a unique session token"
        )))
    }

    /// Look up a pending token without consuming it. Only tokens whose
    /// stored kind is pending resolve here.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn find_pending(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        if SessionKind::from_token(token) != SessionKind::MfaPending {
            return Ok(None);
        }
        self.sessions
            .find_pending(&hash_token(token), self.clock.now())
            .await
    }

    /// Consume a pending token. At most one caller gets the record back.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn take_pending(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        if SessionKind::from_token(token) != SessionKind::MfaPending {
            return Ok(None);
        }
        self.sessions
            .take_pending(&hash_token(token), self.clock.now())
            .await
    }

    /// Resolve a full session token, touching `last_seen_at` without
    /// extending the expiry. Pending tokens never resolve here.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn authenticate(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        if SessionKind::from_token(token) != SessionKind::Full {
            return Ok(None);
        }
        self.sessions
            .find_full(&hash_token(token), self.clock.now())
            .await
    }

    /// Drop a session by raw token; idempotent.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        self.sessions.delete(&hash_token(token)).await
    }

    /// Drop every session of one kind for an account.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn revoke_all(&self, account_id: Uuid, kind: SessionKind) -> Result<u64, StoreError> {
        self.sessions.delete_all_for(account_id, kind).await
    }
}
