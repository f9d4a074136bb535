//! Argon2id password hashing for account credentials.
//!
//! The surrounding application calls [`hash`] when provisioning or changing
//! a password; this crate calls [`verify`] during login. Hashes are PHC
//! strings, so parameters can evolve without a migration.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

/// Hash a password for storage.
///
/// # Errors
/// Returns an error if hashing fails (effectively only on broken RNG).
pub fn hash(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hashed = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hashed)
}

/// Verify a password against a stored hash.
///
/// # Errors
/// Returns an error when the stored hash is not a valid PHC string; a
/// mismatched password is `Ok(false)`, not an error.
pub fn verify(stored_hash: &str, password: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow!("stored password hash is malformed"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
