//! The authentication service: every boundary operation lives here.
//!
//! Flow Overview:
//! 1) `login` verifies the password and either issues a full session (MFA
//!    disabled, or a valid trusted-device token presented) or a pending
//!    token.
//! 2) `mfa_verify` upgrades a pending token to a full session after a TOTP
//!    or recovery code, consulting the rate limiter before any code math.
//! 3) Setup is two-phase: `mfa_setup` stores a pending secret and fresh
//!    recovery codes; `mfa_confirm_setup` flips the account to enabled only
//!    once a valid code proves the authenticator was provisioned.
//!
//! Security boundaries:
//! - Credential failures are uniformly `InvalidCredentials`; nothing reveals
//!   whether the account exists.
//! - The rate limiter runs before Argon2/TOTP work, and outcomes are
//!   recorded after it, so unrelated failures are never counted.
//! - Audit emission is fire-and-forget; a sink failure never changes an
//!   authentication outcome.

use std::sync::Arc;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::password;
use crate::rate_limit::{Decision, RateLimitKey, RateLimiter};
use crate::recovery::RecoveryCodeVault;
use crate::session::{SessionIssuer, SessionKind};
use crate::store::{
    AccountRecord, CredentialStore, MfaStatus, SessionStore, TrustedDeviceRepo,
};
use crate::totp::TotpManager;
use crate::trusted_device::TrustedDeviceStore;
use crate::types::{
    AccountSummary, ClientInfo, LoginOutcome, LoginRequest, MfaSetup, MfaVerified,
    MfaVerifyRequest, TrustedDeviceView,
};

/// Orchestrates credential verification, MFA, sessions, and device trust.
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionIssuer,
    devices: TrustedDeviceStore,
    totp: TotpManager,
    recovery: RecoveryCodeVault,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn TrustedDeviceRepo>,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            sessions: SessionIssuer::new(sessions, clock.clone(), &config),
            devices: TrustedDeviceStore::new(devices, clock.clone(), &config),
            totp: TotpManager::new(config.issuer()),
            recovery: RecoveryCodeVault::new(credentials.clone(), config.recovery_pepper()),
            credentials,
            rate_limiter,
            audit,
            clock,
        }
    }

    /// Password login.
    ///
    /// # Errors
    /// `InvalidCredentials` on unknown identifier or wrong password (never
    /// distinguished), `RateLimited` when the key is locked out, or a store
    /// error.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let identifier = normalize_identifier(&request.identifier);
        if !valid_identifier(&identifier) {
            self.emit(
                AuditKind::LoginFailed,
                None,
                Some(&identifier),
                &request.client,
            );
            return Err(AuthError::InvalidCredentials);
        }

        let Some(account) = self.credentials.find_by_identifier(&identifier).await? else {
            self.emit(
                AuditKind::LoginFailed,
                None,
                Some(&identifier),
                &request.client,
            );
            return Err(AuthError::InvalidCredentials);
        };

        // Limit before the Argon2 work, record after it.
        let key = RateLimitKey::new(request.client.ip.as_deref(), account.id);
        if let Decision::Locked {
            retry_after_seconds,
        } = self.rate_limiter.check(&key)
        {
            self.emit(
                AuditKind::LoginRateLimited,
                Some(&account),
                None,
                &request.client,
            );
            return Err(AuthError::RateLimited {
                retry_after_seconds,
            });
        }

        let password_ok = password::verify(
            &account.password_hash,
            request.password.expose_secret(),
        )?;
        self.rate_limiter.record(&key, password_ok);

        if !password_ok {
            self.emit(
                AuditKind::LoginFailed,
                Some(&account),
                None,
                &request.client,
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.emit(
            AuditKind::LoginSucceeded,
            Some(&account),
            None,
            &request.client,
        );

        if account.mfa.is_enabled() {
            // A valid trusted device skips the second factor; a wrong
            // password was already rejected above, unconditionally.
            if let Some(device_token) = request.device_token.as_deref() {
                if self.devices.check(account.id, device_token).await? {
                    debug!(account = %account.id, "trusted device bypassed MFA");
                    let session_token = self.sessions.issue_session(account.id).await?;
                    return Ok(LoginOutcome::Authenticated {
                        session_token,
                        account: summarize(&account),
                    });
                }
            }
            let pending_token = self.sessions.issue_pending(account.id).await?;
            return Ok(LoginOutcome::MfaRequired { pending_token });
        }

        let session_token = self.sessions.issue_session(account.id).await?;
        Ok(LoginOutcome::Authenticated {
            session_token,
            account: summarize(&account),
        })
    }

    /// Start (or restart) MFA enrollment: provision a pending secret and a
    /// fresh recovery-code batch. The secret does not gate login until
    /// confirmed. Calling this again replaces the pending secret.
    ///
    /// # Errors
    /// `MfaAlreadyEnabled` when a confirmed factor exists,
    /// `InvalidCredentials` for an unknown account, or a store error.
    pub async fn mfa_setup(&self, account_id: Uuid) -> Result<MfaSetup, AuthError> {
        let account = self.account(account_id).await?;
        if account.mfa.is_enabled() {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        let secret = TotpManager::generate_secret()?;
        let provisioning_uri = self.totp.provisioning_uri(&secret, &account.identifier)?;
        let batch = self.recovery.generate()?;

        self.credentials
            .set_mfa_status(
                account_id,
                &MfaStatus::Pending {
                    secret: secret.clone(),
                },
            )
            .await?;
        self.recovery.persist(account_id, &batch).await?;

        self.emit(
            AuditKind::MfaSetupStarted,
            Some(&account),
            None,
            &ClientInfo::default(),
        );

        Ok(MfaSetup {
            secret,
            provisioning_uri,
            recovery_codes: batch.codes,
        })
    }

    /// Confirm enrollment with a code for the pending secret; flips the
    /// account to enabled. Codes for an earlier, replaced secret fail.
    ///
    /// # Errors
    /// `MfaNotConfigured` without a pending secret, `MfaAlreadyEnabled`
    /// after confirmation, `InvalidCode` for a bad code, or a store error.
    pub async fn mfa_confirm_setup(&self, account_id: Uuid, code: &str) -> Result<(), AuthError> {
        let account = self.account(account_id).await?;
        let secret = match &account.mfa {
            MfaStatus::Pending { secret } => secret.clone(),
            MfaStatus::Enabled { .. } => return Err(AuthError::MfaAlreadyEnabled),
            MfaStatus::Disabled => return Err(AuthError::MfaNotConfigured),
        };

        if !self.totp.verify(&secret, code, self.clock.now()) {
            return Err(AuthError::InvalidCode {
                attempts_left: None,
            });
        }

        self.credentials
            .set_mfa_status(account_id, &MfaStatus::Enabled { secret })
            .await?;
        self.emit(
            AuditKind::MfaEnabled,
            Some(&account),
            None,
            &ClientInfo::default(),
        );
        Ok(())
    }

    /// Upgrade a pending token to a full session with a TOTP or recovery
    /// code. Optionally issues a trusted-device token.
    ///
    /// # Errors
    /// `InvalidPendingToken` for an expired/consumed/wrong-kind token,
    /// `RateLimited` when locked out, `InvalidCode` (with the remaining
    /// attempts) for a bad code, or a store error.
    pub async fn mfa_verify(&self, request: MfaVerifyRequest) -> Result<MfaVerified, AuthError> {
        let Some(pending) = self.sessions.find_pending(&request.pending_token).await? else {
            self.emit(AuditKind::MfaVerifyFailed, None, None, &request.client);
            return Err(AuthError::InvalidPendingToken);
        };
        let Some(account) = self.credentials.find_by_id(pending.account_id).await? else {
            // The account vanished under a live pending token.
            return Err(AuthError::InvalidPendingToken);
        };
        let MfaStatus::Enabled { secret } = account.mfa.clone() else {
            return Err(AuthError::MfaNotConfigured);
        };

        // Limit before the code verification, record after it.
        let key = RateLimitKey::new(request.client.ip.as_deref(), account.id);
        if let Decision::Locked {
            retry_after_seconds,
        } = self.rate_limiter.check(&key)
        {
            self.emit(
                AuditKind::MfaRateLimited,
                Some(&account),
                None,
                &request.client,
            );
            return Err(AuthError::RateLimited {
                retry_after_seconds,
            });
        }

        let mut used_recovery_code = false;
        let code_ok = if looks_like_totp(&request.code) {
            self.totp.verify(&secret, &request.code, self.clock.now())
        } else {
            match self.recovery.consume(account.id, &request.code).await? {
                Some(remaining) => {
                    used_recovery_code = true;
                    info!(account = %account.id, remaining, "recovery code consumed");
                    true
                }
                None => false,
            }
        };
        self.rate_limiter.record(&key, code_ok);

        if !code_ok {
            self.emit(
                AuditKind::MfaVerifyFailed,
                Some(&account),
                None,
                &request.client,
            );
            return Err(AuthError::InvalidCode {
                attempts_left: Some(self.rate_limiter.attempts_left(&key)),
            });
        }

        // Consume the pending token; a concurrent verification of the same
        // token loses here.
        if self
            .sessions
            .take_pending(&request.pending_token)
            .await?
            .is_none()
        {
            return Err(AuthError::InvalidPendingToken);
        }
        // Any other outstanding pending tokens for the account are stale.
        self.sessions
            .revoke_all(account.id, SessionKind::MfaPending)
            .await?;

        if used_recovery_code {
            self.emit(
                AuditKind::RecoveryCodeUsed,
                Some(&account),
                None,
                &request.client,
            );
        }

        let session_token = self.sessions.issue_session(account.id).await?;
        let device_token = if request.trust_device {
            let token = self
                .devices
                .issue(account.id, request.device_name.clone(), &request.client)
                .await?;
            self.emit(
                AuditKind::TrustedDeviceIssued,
                Some(&account),
                None,
                &request.client,
            );
            Some(token)
        } else {
            None
        };

        self.emit(AuditKind::MfaVerified, Some(&account), None, &request.client);

        Ok(MfaVerified {
            session_token,
            account: summarize(&account),
            device_token,
        })
    }

    /// Disable MFA. Requires the current password and a valid TOTP code;
    /// clears the secret and recovery codes and revokes all trusted devices
    /// (a disabled factor must leave no usable bypass behind).
    ///
    /// # Errors
    /// `MfaNotConfigured`, `InvalidCredentials`, `InvalidCode`, or a store
    /// error.
    pub async fn mfa_disable(
        &self,
        account_id: Uuid,
        password: &SecretString,
        code: &str,
    ) -> Result<(), AuthError> {
        let account = self.account(account_id).await?;
        let MfaStatus::Enabled { secret } = account.mfa.clone() else {
            return Err(AuthError::MfaNotConfigured);
        };

        if !password::verify(&account.password_hash, password.expose_secret())? {
            return Err(AuthError::InvalidCredentials);
        }
        if !self.totp.verify(&secret, code, self.clock.now()) {
            return Err(AuthError::InvalidCode {
                attempts_left: None,
            });
        }

        self.credentials
            .set_mfa_status(account_id, &MfaStatus::Disabled)
            .await?;
        self.credentials
            .replace_recovery_codes(account_id, &[])
            .await?;
        let revoked = self.devices.revoke_all(account_id).await?;
        if revoked > 0 {
            info!(account = %account_id, revoked, "trusted devices revoked on MFA disable");
        }

        self.emit(
            AuditKind::MfaDisabled,
            Some(&account),
            None,
            &ClientInfo::default(),
        );
        Ok(())
    }

    /// Replace the account's recovery codes with a fresh batch, invalidating
    /// every previously issued code. Requires password and TOTP proof.
    ///
    /// # Errors
    /// `MfaNotConfigured`, `InvalidCredentials`, `InvalidCode`, or a store
    /// error.
    pub async fn regenerate_recovery_codes(
        &self,
        account_id: Uuid,
        password: &SecretString,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        let account = self.account(account_id).await?;
        let MfaStatus::Enabled { secret } = account.mfa.clone() else {
            return Err(AuthError::MfaNotConfigured);
        };

        if !password::verify(&account.password_hash, password.expose_secret())? {
            return Err(AuthError::InvalidCredentials);
        }
        if !self.totp.verify(&secret, code, self.clock.now()) {
            return Err(AuthError::InvalidCode {
                attempts_left: None,
            });
        }

        let batch = self.recovery.generate()?;
        self.recovery.persist(account_id, &batch).await?;
        self.emit(
            AuditKind::RecoveryCodesRegenerated,
            Some(&account),
            None,
            &ClientInfo::default(),
        );
        Ok(batch.codes)
    }

    /// Trusted devices for the account's settings page.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn list_trusted_devices(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<TrustedDeviceView>, AuthError> {
        let devices = self.devices.list(account_id).await?;
        Ok(devices
            .into_iter()
            .map(|record| TrustedDeviceView {
                id: record.id,
                device_name: record.device_name,
                browser_label: record.browser_label,
                os_label: record.os_label,
                origin_ip: record.origin_ip,
                created_at: record.created_at,
                last_used_at: record.last_used_at,
                expires_at: record.expires_at,
            })
            .collect())
    }

    /// Revoke one trusted device.
    ///
    /// # Errors
    /// `DeviceNotFound` or a store error.
    pub async fn revoke_trusted_device(
        &self,
        account_id: Uuid,
        device_id: Uuid,
    ) -> Result<(), AuthError> {
        self.devices.revoke(account_id, device_id).await?;
        self.emit(
            AuditKind::TrustedDeviceRevoked,
            None,
            None,
            &ClientInfo::default(),
        );
        Ok(())
    }

    /// Revoke every trusted device for the account.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn revoke_all_trusted_devices(&self, account_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self.devices.revoke_all(account_id).await?;
        if revoked > 0 {
            self.emit(
                AuditKind::TrustedDeviceRevoked,
                None,
                None,
                &ClientInfo::default(),
            );
        }
        Ok(revoked)
    }

    /// Resolve a full session token for per-request authentication. Pending
    /// tokens never resolve here.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn authenticate_session(
        &self,
        session_token: &str,
    ) -> Result<Option<AccountSummary>, AuthError> {
        let Some(session) = self.sessions.authenticate(session_token).await? else {
            return Ok(None);
        };
        let Some(account) = self.credentials.find_by_id(session.account_id).await? else {
            return Ok(None);
        };
        Ok(Some(summarize(&account)))
    }

    /// Drop a session; idempotent.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn logout(&self, session_token: &str) -> Result<(), AuthError> {
        self.sessions.revoke(session_token).await?;
        Ok(())
    }

    async fn account(&self, account_id: Uuid) -> Result<AccountRecord, AuthError> {
        self.credentials
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)
    }

    fn emit(
        &self,
        kind: AuditKind,
        account: Option<&AccountRecord>,
        identifier: Option<&str>,
        client: &ClientInfo,
    ) {
        let mut event = AuditEvent::new(kind, self.clock.now()).with_client(client);
        if let Some(account) = account {
            event = event
                .with_account(account.id)
                .with_identifier(account.identifier.clone());
        } else if let Some(identifier) = identifier {
            event = event.with_identifier(identifier);
        }
        self.audit.record(event);
    }
}

fn summarize(account: &AccountRecord) -> AccountSummary {
    AccountSummary {
        id: account.id,
        identifier: account.identifier.clone(),
        mfa_enabled: account.mfa.is_enabled(),
    }
}

/// Normalize an identifier for lookup; matching is case-insensitive.
#[must_use]
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Basic email-shape check on already-normalized input.
#[must_use]
pub fn valid_identifier(identifier: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(identifier))
}

/// Six ASCII digits route to TOTP; everything else is tried as a recovery
/// code.
fn looks_like_totp(code: &str) -> bool {
    let code = code.trim();
    code.len() == 6 && code.bytes().all(|byte| byte.is_ascii_digit())
}
