//! Error taxonomy for the authentication boundary.
//!
//! Verification failures are typed results, never opaque errors: callers
//! branch on the variant to shape their response. The credential/password
//! variants stay deliberately generic so responses cannot be used to probe
//! which accounts exist or which factor was checked.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown identifier or wrong password; never distinguishes the two.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account has no confirmed MFA factor for this operation.
    #[error("multi-factor authentication is not configured")]
    MfaNotConfigured,

    /// `mfa_setup` confirmation attempted while a factor is already active.
    #[error("multi-factor authentication is already enabled")]
    MfaAlreadyEnabled,

    /// Pending token is expired, malformed, already consumed, or of the
    /// wrong kind.
    #[error("pending authentication token is invalid")]
    InvalidPendingToken,

    /// Bad TOTP or recovery code. `attempts_left` is populated on the
    /// rate-limited verification path.
    #[error("invalid verification code")]
    InvalidCode { attempts_left: Option<u32> },

    /// Too many failures for this client/account pair.
    #[error("rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("trusted device not found")]
    DeviceNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal plumbing failure (hashing, token generation). Surfaced
    /// immediately; this subsystem never retries on its own.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
