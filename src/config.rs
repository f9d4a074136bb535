//! Auth configuration loaded at startup.

use std::sync::Arc;

const DEFAULT_ISSUER: &str = "Horaro";
const DEFAULT_PENDING_TOKEN_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_DEVICE_TRUST_TTL_DAYS: i64 = 30;

const ENV_ISSUER: &str = "HORARO_AUTH_ISSUER";
const ENV_PENDING_TOKEN_TTL: &str = "HORARO_AUTH_PENDING_TTL_SECONDS";
const ENV_SESSION_TTL: &str = "HORARO_AUTH_SESSION_TTL_SECONDS";
const ENV_DEVICE_TRUST_TTL: &str = "HORARO_AUTH_DEVICE_TTL_DAYS";
const ENV_RECOVERY_PEPPER: &str = "HORARO_AUTH_RECOVERY_PEPPER";

/// Configuration for the authentication subsystem.
///
/// TTLs are deliberately asymmetric: pending-MFA tokens live minutes, full
/// sessions live days, device trust lives a fixed 30 days from issuance.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    pending_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    device_trust_ttl_days: i64,
    recovery_pepper: Option<Arc<[u8]>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            pending_token_ttl_seconds: DEFAULT_PENDING_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            device_trust_ttl_days: DEFAULT_DEVICE_TRUST_TTL_DAYS,
            recovery_pepper: None,
        }
    }

    /// Load configuration from `HORARO_AUTH_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(issuer) = std::env::var(ENV_ISSUER) {
            let issuer = issuer.trim();
            if !issuer.is_empty() {
                config.issuer = issuer.to_string();
            }
        }
        if let Some(seconds) = parse_i64_env(ENV_PENDING_TOKEN_TTL) {
            config.pending_token_ttl_seconds = seconds;
        }
        if let Some(seconds) = parse_i64_env(ENV_SESSION_TTL) {
            config.session_ttl_seconds = seconds;
        }
        if let Some(days) = parse_i64_env(ENV_DEVICE_TRUST_TTL) {
            config.device_trust_ttl_days = days;
        }
        if let Ok(pepper) = std::env::var(ENV_RECOVERY_PEPPER) {
            if !pepper.is_empty() {
                config.recovery_pepper = Some(Arc::from(pepper.into_bytes()));
            }
        }
        config
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_pending_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.pending_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_device_trust_ttl_days(mut self, days: i64) -> Self {
        self.device_trust_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_recovery_pepper(mut self, pepper: Arc<[u8]>) -> Self {
        self.recovery_pepper = Some(pepper);
        self
    }

    /// Issuer label embedded in `otpauth://` provisioning URIs.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn pending_token_ttl_seconds(&self) -> i64 {
        self.pending_token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn device_trust_ttl_days(&self) -> i64 {
        self.device_trust_ttl_days
    }

    pub(crate) fn recovery_pepper(&self) -> Option<Arc<[u8]>> {
        self.recovery_pepper.clone()
    }
}

fn parse_i64_env(key: &str) -> Option<i64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::{
        AuthConfig, ENV_DEVICE_TRUST_TTL, ENV_ISSUER, ENV_PENDING_TOKEN_TTL, ENV_RECOVERY_PEPPER,
        ENV_SESSION_TTL,
    };
    use std::sync::Arc;

    #[test]
    fn defaults_and_overrides() {
        let config = AuthConfig::new();
        assert_eq!(config.issuer(), "Horaro");
        assert_eq!(config.pending_token_ttl_seconds(), 5 * 60);
        assert_eq!(config.session_ttl_seconds(), 7 * 24 * 60 * 60);
        assert_eq!(config.device_trust_ttl_days(), 30);
        assert!(config.recovery_pepper().is_none());

        let config = config
            .with_issuer("Horaro Staging")
            .with_pending_token_ttl_seconds(120)
            .with_session_ttl_seconds(3600)
            .with_device_trust_ttl_days(7)
            .with_recovery_pepper(Arc::from(b"pepper".to_vec()));

        assert_eq!(config.issuer(), "Horaro Staging");
        assert_eq!(config.pending_token_ttl_seconds(), 120);
        assert_eq!(config.session_ttl_seconds(), 3600);
        assert_eq!(config.device_trust_ttl_days(), 7);
        assert!(config.recovery_pepper().is_some());
    }

    #[test]
    fn from_env_reads_overrides() {
        temp_env::with_vars(
            [
                (ENV_ISSUER, Some("Horaro Test")),
                (ENV_PENDING_TOKEN_TTL, Some("90")),
                (ENV_SESSION_TTL, Some("7200")),
                (ENV_DEVICE_TRUST_TTL, Some("14")),
                (ENV_RECOVERY_PEPPER, Some("sekreta")),
            ],
            || {
                let config = AuthConfig::from_env();
                assert_eq!(config.issuer(), "Horaro Test");
                assert_eq!(config.pending_token_ttl_seconds(), 90);
                assert_eq!(config.session_ttl_seconds(), 7200);
                assert_eq!(config.device_trust_ttl_days(), 14);
                assert_eq!(
                    config.recovery_pepper().as_deref(),
                    Some(b"sekreta".as_slice())
                );
            },
        );
    }

    #[test]
    fn from_env_ignores_garbage() {
        temp_env::with_vars(
            [
                (ENV_PENDING_TOKEN_TTL, Some("not-a-number")),
                (ENV_SESSION_TTL, Some("-5")),
            ],
            || {
                let config = AuthConfig::from_env();
                assert_eq!(config.pending_token_ttl_seconds(), 5 * 60);
                assert_eq!(config.session_ttl_seconds(), 7 * 24 * 60 * 60);
            },
        );
    }
}
