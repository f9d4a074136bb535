//! Trusted-device tokens: a bounded MFA bypass.
//!
//! A device becomes trusted only through a successful MFA verification with
//! the caller opted in. Trust is 30 days from issuance, never extended by
//! use, and revocable at any time. The raw token is the sole credential;
//! the stored metadata (browser/OS labels, origin IP) is descriptive only.
//! Trusting a device never weakens the password check.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::session::{generate_token, hash_token};
use crate::store::{StoreError, TrustedDeviceRecord, TrustedDeviceRepo};
use crate::types::ClientInfo;

/// Issues, validates, and revokes device-trust tokens.
pub struct TrustedDeviceStore {
    repo: Arc<dyn TrustedDeviceRepo>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl TrustedDeviceStore {
    #[must_use]
    pub fn new(repo: Arc<dyn TrustedDeviceRepo>, clock: Arc<dyn Clock>, config: &AuthConfig) -> Self {
        Self {
            repo,
            clock,
            ttl: Duration::days(config.device_trust_ttl_days()),
        }
    }

    /// Mint a trust token for the calling device and persist its record.
    /// Returns the raw token; it is never reconstructable afterwards.
    ///
    /// # Errors
    /// Returns an error on RNG or store failure.
    pub async fn issue(
        &self,
        account_id: Uuid,
        device_name: Option<String>,
        client: &ClientInfo,
    ) -> Result<String, AuthError> {
        let token = generate_token()?;
        let now = self.clock.now();
        let (browser_label, os_label) = device_labels(client.user_agent.as_deref());
        let device_name =
            device_name.unwrap_or_else(|| format!("{browser_label} on {os_label}"));
        self.repo
            .insert(TrustedDeviceRecord {
                id: Uuid::new_v4(),
                account_id,
                token_hash: hash_token(&token),
                device_name,
                browser_label,
                os_label,
                origin_ip: client.ip.clone(),
                created_at: now,
                last_used_at: now,
                expires_at: now + self.ttl,
            })
            .await?;
        Ok(token)
    }

    /// Whether the token grants an MFA bypass right now. Valid strictly
    /// before `expires_at`; a hit updates `last_used_at` only.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn check(&self, account_id: Uuid, token: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        match self
            .repo
            .find_by_token_hash(account_id, &hash_token(token))
            .await?
        {
            Some(record) if record.expires_at > now => {
                self.repo.touch_last_used(record.id, now).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// All trusted devices for an account, oldest first.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDeviceRecord>, StoreError> {
        self.repo.list(account_id).await
    }

    /// Revoke one device immediately.
    ///
    /// # Errors
    /// `DeviceNotFound` when no such device belongs to the account.
    pub async fn revoke(&self, account_id: Uuid, device_id: Uuid) -> Result<(), AuthError> {
        if self.repo.delete(account_id, device_id).await? {
            Ok(())
        } else {
            Err(AuthError::DeviceNotFound)
        }
    }

    /// Revoke every device for an account, returning how many were dropped.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64, StoreError> {
        self.repo.delete_all(account_id).await
    }
}

/// Best-effort (browser, OS) labels from a user-agent string. Purely
/// descriptive; wrong guesses cost nothing but a confusing settings row.
#[must_use]
pub fn device_labels(user_agent: Option<&str>) -> (String, String) {
    let Some(user_agent) = user_agent else {
        return ("Unknown browser".to_string(), "Unknown OS".to_string());
    };

    // Order matters: Chrome-family agents also claim Safari, Edge and Opera
    // also claim Chrome.
    let browser = if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
        "Edge"
    } else if user_agent.contains("OPR/") || user_agent.contains("Opera") {
        "Opera"
    } else if user_agent.contains("Firefox/") {
        "Firefox"
    } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS/") {
        "Chrome"
    } else if user_agent.contains("Safari/") {
        "Safari"
    } else {
        "Unknown browser"
    };

    let os = if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        "iOS"
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        "macOS"
    } else if user_agent.contains("CrOS") {
        "ChromeOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "Unknown OS"
    };

    (browser.to_string(), os.to_string())
}
