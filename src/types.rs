//! Request and outcome types crossing the auth boundary.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse client identity attached to audit events and rate-limit keys.
///
/// Carries what the transport layer saw, never anything the user typed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }
}

/// Pick the most specific client address available: the first entry of a
/// forwarded-for header, else the direct peer address.
#[must_use]
pub fn preferred_client_ip(
    forwarded_for: Option<&str>,
    peer_addr: Option<&str>,
) -> Option<String> {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return Some(forwarded.to_string());
    }
    peer_addr
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Password login request.
#[derive(Debug)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: SecretString,
    /// Raw trusted-device token, if the client holds one. Only consulted
    /// after the password checks out.
    pub device_token: Option<String>,
    pub client: ClientInfo,
}

/// What a successful `login` call produced.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Password was correct and no second factor is required (MFA disabled,
    /// or a valid trusted-device token was presented).
    Authenticated {
        session_token: String,
        account: AccountSummary,
    },
    /// Password was correct but the account requires MFA verification.
    MfaRequired { pending_token: String },
}

/// MFA verification request against a pending token.
#[derive(Debug)]
pub struct MfaVerifyRequest {
    pub pending_token: String,
    /// Six digits are treated as a TOTP code, anything else as a recovery
    /// code.
    pub code: String,
    pub trust_device: bool,
    /// Optional caller-supplied device name; defaults to the parsed
    /// browser/OS labels.
    pub device_name: Option<String>,
    pub client: ClientInfo,
}

/// Successful MFA verification.
#[derive(Debug)]
pub struct MfaVerified {
    pub session_token: String,
    pub account: AccountSummary,
    /// Present when the caller opted into device trust.
    pub device_token: Option<String>,
}

/// Material returned once from `mfa_setup`.
#[derive(Debug, Serialize)]
pub struct MfaSetup {
    pub secret: String,
    pub provisioning_uri: String,
    pub recovery_codes: Vec<String>,
}

/// Minimal account data handed back to the surrounding application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub identifier: String,
    pub mfa_enabled: bool,
}

/// Trusted-device metadata for account settings pages. Never exposes the
/// token or its hash.
#[derive(Clone, Debug, Serialize)]
pub struct TrustedDeviceView {
    pub id: Uuid,
    pub device_name: String,
    pub browser_label: String,
    pub os_label: String,
    pub origin_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
