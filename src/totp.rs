//! TOTP generation and verification.
//!
//! Parameters are pinned here rather than inherited from library defaults:
//! SHA-1, 6 digits, 30-second steps, and a tolerance of exactly one step on
//! either side of the current one. Widening `SKEW_STEPS` widens the window a
//! stolen code stays valid in.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use totp_rs::{Algorithm, Secret, TOTP};

pub const DIGITS: usize = 6;
pub const STEP_SECONDS: u64 = 30;
pub const SKEW_STEPS: u8 = 1;

/// Builds provisioning URIs and validates codes against per-account secrets.
#[derive(Clone, Debug)]
pub struct TotpManager {
    issuer: String,
}

impl TotpManager {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Generate a fresh base32-encoded secret (160 bits of entropy).
    ///
    /// # Errors
    /// Returns an error if the generated secret cannot be encoded.
    pub fn generate_secret() -> Result<String> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|err| anyhow!("secret generation failed: {err:?}"))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret_bytes,
            None,
            String::new(),
        )
        .map_err(|err| anyhow!("secret encoding failed: {err}"))?;
        Ok(totp.get_secret_base32())
    }

    /// Build the `otpauth://` URI for authenticator-app provisioning. Pure;
    /// renders the same URI for the same inputs.
    ///
    /// # Errors
    /// Returns an error when the secret is not valid base32 or the labels
    /// are not representable in an otpauth URI.
    pub fn provisioning_uri(&self, secret_base32: &str, account_label: &str) -> Result<String> {
        let totp = self.build(secret_base32, account_label)?;
        Ok(totp.get_url())
    }

    /// Check a submitted code against the secret at `now`, accepting the
    /// immediately preceding and following time steps.
    ///
    /// Comparison of each derived code is constant-time; which *step*
    /// matched is not secret, which digits differ is.
    #[must_use]
    pub fn verify(&self, secret_base32: &str, code: &str, now: DateTime<Utc>) -> bool {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|byte| byte.is_ascii_digit()) {
            return false;
        }
        let Ok(totp) = self.build(secret_base32, "account") else {
            return false;
        };
        let Ok(timestamp) = u64::try_from(now.timestamp()) else {
            return false;
        };

        let mut matched = false;
        for step in 0..=u64::from(SKEW_STEPS) * 2 {
            let offset = step * STEP_SECONDS;
            let shifted = (timestamp + offset).checked_sub(u64::from(SKEW_STEPS) * STEP_SECONDS);
            let Some(at) = shifted else {
                continue;
            };
            let expected = totp.generate(at);
            matched |= constant_time_eq(expected.as_bytes(), code.as_bytes());
        }
        matched
    }

    fn build(&self, secret_base32: &str, account_label: &str) -> Result<TOTP> {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| anyhow!("invalid TOTP secret: {err:?}"))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|err| anyhow!("failed to build TOTP: {err}"))
    }
}

/// Constant-time byte comparison; unequal lengths short-circuit (length is
/// not secret for fixed-width codes).
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::{constant_time_eq, TotpManager, DIGITS, SKEW_STEPS, STEP_SECONDS};
    use chrono::{Duration, TimeZone, Utc};
    use totp_rs::{Algorithm, Secret, TOTP};

    fn code_for(secret_base32: &str, at_unix: u64) -> String {
        let secret = Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret,
            Some("Horaro".to_string()),
            "user@example.com".to_string(),
        )
        .unwrap();
        totp.generate(at_unix)
    }

    #[test]
    fn generated_secret_has_full_entropy() {
        let secret = TotpManager::generate_secret().unwrap();
        let bytes = Secret::Encoded(secret).to_bytes().unwrap();
        assert_eq!(bytes.len(), 20, "expected 160 bits of secret material");
    }

    #[test]
    fn round_trip_at_current_step() {
        let manager = TotpManager::new("Horaro");
        let secret = TotpManager::generate_secret().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 15).unwrap();
        let code = code_for(&secret, now.timestamp() as u64);
        assert!(manager.verify(&secret, &code, now));
    }

    #[test]
    fn accepts_adjacent_steps_only() {
        let manager = TotpManager::new("Horaro");
        let secret = TotpManager::generate_secret().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 15).unwrap();
        let code = code_for(&secret, now.timestamp() as u64);

        assert!(manager.verify(&secret, &code, now + Duration::seconds(30)));
        assert!(manager.verify(&secret, &code, now - Duration::seconds(30)));
        assert!(!manager.verify(&secret, &code, now + Duration::seconds(90)));
        assert!(!manager.verify(&secret, &code, now - Duration::seconds(90)));
    }

    #[test]
    fn rejects_malformed_codes() {
        let manager = TotpManager::new("Horaro");
        let secret = TotpManager::generate_secret().unwrap();
        let now = Utc::now();
        assert!(!manager.verify(&secret, "12345", now));
        assert!(!manager.verify(&secret, "1234567", now));
        assert!(!manager.verify(&secret, "12a456", now));
        assert!(!manager.verify(&secret, "", now));
    }

    #[test]
    fn provisioning_uri_carries_issuer_and_label() {
        let manager = TotpManager::new("Horaro");
        let secret = TotpManager::generate_secret().unwrap();
        let uri = manager
            .provisioning_uri(&secret, "user@example.com")
            .unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("issuer=Horaro"));
        assert!(uri.contains("user%40example.com") || uri.contains("user@example.com"));
        assert!(uri.contains(&secret));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"123456", b"12345"));
    }
}
