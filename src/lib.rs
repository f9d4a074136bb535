//! # Horaro Auth
//!
//! `horaro-auth` is the authentication and multi-factor verification
//! subsystem of Horaro (time tracking, ticketing, invoicing). The rest of
//! the product is CRUD around it; this crate owns the security state.
//!
//! ## Login flow
//!
//! Password verification either issues a full session directly (MFA
//! disabled, or a valid trusted-device token presented) or a short-lived
//! pending token. A pending token grants nothing except the right to call
//! [`AuthService::mfa_verify`], which upgrades it to a full session after a
//! TOTP or single-use recovery code.
//!
//! ## Security boundaries
//!
//! - Credential failures are uniformly generic; responses never reveal
//!   whether an account exists or which factor was checked.
//! - The sliding-window rate limiter runs *before* any Argon2 or TOTP work
//!   and locks a (client, account) key after five failures in fifteen
//!   minutes.
//! - Recovery codes and trusted-device/session tokens are stored only as
//!   hashes; plaintext leaves the crate exactly once, at generation.
//! - Trusted devices bypass MFA for a fixed 30 days, never the password
//!   check, and are revocable at any time.
//!
//! ## Embedding
//!
//! All time flows through [`Clock`], storage through the traits in
//! [`store`], and audit events through [`AuditSink`], so the surrounding
//! application chooses Postgres or memory, wall clock or test clock, and
//! its own audit pipeline.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod password;
pub mod rate_limit;
pub mod recovery;
pub mod service;
pub mod session;
pub mod store;
pub mod totp;
pub mod trusted_device;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::AuthError;
pub use rate_limit::{
    spawn_sweeper, Decision, NoopRateLimiter, RateLimitKey, RateLimiter, SlidingWindowLimiter,
    SweeperHandle,
};
pub use service::AuthService;
pub use session::SessionKind;
pub use store::{MfaStatus, StoreError};
pub use types::{
    preferred_client_ip, AccountSummary, ClientInfo, LoginOutcome, LoginRequest, MfaSetup,
    MfaVerified, MfaVerifyRequest, TrustedDeviceView,
};
