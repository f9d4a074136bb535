//! Recovery code generation and consumption.
//!
//! Recovery codes substitute for a TOTP code when the authenticator device
//! is unavailable. Codes are Argon2id-hashed (optionally with a server-side
//! pepper); plaintext exists only in the batch returned to the caller.
//! Consumption removes the matched hash, so every code is single-use, and
//! the removal is conditional so two concurrent submissions of the same code
//! cannot both succeed.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{rngs::OsRng, RngCore};
use tracing::warn;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::CredentialStore;

pub const RECOVERY_CODE_COUNT: usize = 8;
pub const RECOVERY_CODE_LEN: usize = 8;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
// Uppercase alphanumerics with the confusable 0/O/1/I removed.
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated recovery-code batch (plaintext + hashes).
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

/// Generates and consumes single-use recovery codes for an account.
pub struct RecoveryCodeVault {
    store: Arc<dyn CredentialStore>,
    pepper: Option<Arc<[u8]>>,
}

impl RecoveryCodeVault {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, pepper: Option<Arc<[u8]>>) -> Self {
        Self { store, pepper }
    }

    /// Generate a fresh batch. Plaintext codes leave this function exactly
    /// once; only the hashes are ever stored.
    ///
    /// # Errors
    /// Returns an error if the RNG or hashing fails.
    pub fn generate(&self) -> Result<RecoveryCodeBatch> {
        let mut rng = OsRng;
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let normalized = generate_code(&mut rng);
            let hash = hash_recovery_code(&normalized, self.pepper.as_deref())?;
            codes.push(format_recovery_code(&normalized)?);
            code_hashes.push(hash);
        }
        Ok(RecoveryCodeBatch { codes, code_hashes })
    }

    /// Replace the account's stored codes with this batch, invalidating all
    /// previously issued codes in one step.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn persist(&self, account_id: Uuid, batch: &RecoveryCodeBatch) -> Result<(), AuthError> {
        self.store
            .replace_recovery_codes(account_id, &batch.code_hashes)
            .await?;
        Ok(())
    }

    /// Try to consume a submitted code. Returns the number of codes left
    /// after a successful consume, `None` when nothing matched (including
    /// when a concurrent request consumed the same code first).
    ///
    /// The scan is a deliberate linear pass over at most
    /// [`RECOVERY_CODE_COUNT`] hashes; the conditional remove is what keeps
    /// check-and-remove atomic per account.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn consume(
        &self,
        account_id: Uuid,
        submitted: &str,
    ) -> Result<Option<usize>, AuthError> {
        let Ok(normalized) = normalize_recovery_code(submitted) else {
            return Ok(None);
        };
        let hashes = self.store.recovery_code_hashes(account_id).await?;
        for hash in &hashes {
            let matched = match verify_recovery_code(&normalized, hash, self.pepper.as_deref()) {
                Ok(matched) => matched,
                Err(err) => {
                    warn!("skipping unverifiable recovery code hash: {err}");
                    false
                }
            };
            if matched {
                let removed = self.store.remove_recovery_code(account_id, hash).await?;
                if removed {
                    return Ok(Some(hashes.len() - 1));
                }
                // Lost the race with a concurrent submission of this code.
                return Ok(None);
            }
        }
        Ok(None)
    }
}

/// Normalize a submitted recovery code (strip separators, uppercase).
///
/// # Errors
/// Returns an error when the result is not a plausible code.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid recovery code characters"));
    }
    Ok(normalized)
}

/// Format a normalized code for display (`ABCD-EFGH`).
///
/// # Errors
/// Returns an error for inputs of the wrong width.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 1);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let normalized: String = raw
        .iter()
        .map(|byte| {
            let idx = usize::from(*byte) % RECOVERY_CODE_ALPHABET.len();
            RECOVERY_CODE_ALPHABET[idx] as char
        })
        .collect();
    normalized
}

fn argon2(pepper: Option<&[u8]>) -> Result<Argon2<'_>> {
    match pepper {
        Some(pepper) => Argon2::new_with_secret(
            pepper,
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::default(),
        )
        .map_err(|_| anyhow!("failed to initialize Argon2id with pepper")),
        None => Ok(Argon2::default()),
    }
}

/// Hash a normalized recovery code for storage.
fn hash_recovery_code(normalized: &str, pepper: Option<&[u8]>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2(pepper)?
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}

/// Verify a normalized code against a stored hash.
fn verify_recovery_code(normalized: &str, stored_hash: &str, pepper: Option<&[u8]>) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|_| anyhow!("stored recovery code hash is malformed"))?;
    Ok(argon2(pepper)?
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::{
        format_recovery_code, generate_code, hash_recovery_code, normalize_recovery_code,
        verify_recovery_code, RECOVERY_CODE_LEN,
    };
    use rand::rngs::OsRng;

    #[test]
    fn normalize_strips_separator_and_uppercases() {
        let normalized = normalize_recovery_code("abcd-efgh").unwrap();
        assert_eq!(normalized, "ABCDEFGH");
    }

    #[test]
    fn normalize_rejects_wrong_width_and_confusables() {
        assert!(normalize_recovery_code("ABC").is_err());
        assert!(normalize_recovery_code("ABCDEFGHJ").is_err());
        // 0 and 1 are not in the alphabet.
        assert!(normalize_recovery_code("ABCD-EF01").is_err());
    }

    #[test]
    fn format_groups_in_fours() {
        assert_eq!(format_recovery_code("ABCDEFGH").unwrap(), "ABCD-EFGH");
        assert!(format_recovery_code("ABC").is_err());
    }

    #[test]
    fn generated_codes_are_well_formed() {
        let code = generate_code(&mut OsRng);
        assert_eq!(code.len(), RECOVERY_CODE_LEN);
        assert!(normalize_recovery_code(&code).is_ok());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_recovery_code("ABCDEFGH", None).unwrap();
        assert!(verify_recovery_code("ABCDEFGH", &hash, None).unwrap());
        assert!(!verify_recovery_code("ABCDEFGJ", &hash, None).unwrap());
    }

    #[test]
    fn pepper_changes_the_verification_domain() {
        let hash = hash_recovery_code("ABCDEFGH", Some(b"pepper")).unwrap();
        assert!(verify_recovery_code("ABCDEFGH", &hash, Some(b"pepper")).unwrap());
        assert!(!verify_recovery_code("ABCDEFGH", &hash, None).unwrap());
    }
}
