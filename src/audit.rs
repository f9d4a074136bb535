//! Security event sink.
//!
//! Audit persistence is the surrounding application's problem; this crate
//! emits structured events into an [`AuditSink`] and never lets a sink
//! failure change an authentication outcome.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::ClientInfo;

/// Stable vocabulary of security events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    LoginSucceeded,
    LoginFailed,
    LoginRateLimited,
    MfaSetupStarted,
    MfaEnabled,
    MfaDisabled,
    MfaVerified,
    MfaVerifyFailed,
    MfaRateLimited,
    RecoveryCodeUsed,
    RecoveryCodesRegenerated,
    TrustedDeviceIssued,
    TrustedDeviceRevoked,
}

impl AuditKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSucceeded => "login_succeeded",
            Self::LoginFailed => "login_failed",
            Self::LoginRateLimited => "login_rate_limited",
            Self::MfaSetupStarted => "mfa_setup_started",
            Self::MfaEnabled => "mfa_enabled",
            Self::MfaDisabled => "mfa_disabled",
            Self::MfaVerified => "mfa_verified",
            Self::MfaVerifyFailed => "mfa_verify_failed",
            Self::MfaRateLimited => "mfa_rate_limited",
            Self::RecoveryCodeUsed => "recovery_code_used",
            Self::RecoveryCodesRegenerated => "recovery_codes_regenerated",
            Self::TrustedDeviceIssued => "trusted_device_issued",
            Self::TrustedDeviceRevoked => "trusted_device_revoked",
        }
    }
}

/// A single security event. Carries coarse client identity only; submitted
/// passwords and codes never appear here.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub account_id: Option<Uuid>,
    pub identifier: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            account_id: None,
            identifier: None,
            ip: None,
            user_agent: None,
            at,
        }
    }

    #[must_use]
    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.ip = client.ip.clone();
        self.user_agent = client.user_agent.clone();
        self
    }
}

/// Write-only sink for security events. Implementations must be
/// fire-and-forget: a failed write is their problem, not the caller's.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                info!(target: "horaro_auth::audit", kind = event.kind.as_str(), %payload, "audit event");
            }
            Err(err) => {
                // Swallowed on purpose: auditing must never fail the
                // operation that produced the event.
                warn!("failed to serialize audit event: {err}");
            }
        }
    }
}

/// Collects events in memory; test helper.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
