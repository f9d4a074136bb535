//! End-to-end login and MFA flows over the in-memory stores.
//!
//! The manual clock drives every expiry and window boundary, so these
//! scenarios are deterministic.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::SecretString;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use horaro_auth::password;
use horaro_auth::store::memory::{
    MemoryCredentialStore, MemorySessionStore, MemoryTrustedDeviceRepo,
};
use horaro_auth::store::{AccountRecord, CredentialStore, MfaStatus};
use horaro_auth::{
    AuditKind, AuthConfig, AuthError, AuthService, ClientInfo, Clock, LoginOutcome, LoginRequest,
    ManualClock, MemoryAuditSink, MfaVerifyRequest, SlidingWindowLimiter,
};

const PASSWORD: &str = "korekta cevala baterio";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0";

struct Harness {
    service: AuthService,
    clock: Arc<ManualClock>,
    credentials: Arc<MemoryCredentialStore>,
    audit: Arc<MemoryAuditSink>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
    ));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let limiter = Arc::new(SlidingWindowLimiter::new(clock.clone()));
    let service = AuthService::new(
        credentials.clone(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryTrustedDeviceRepo::new()),
        limiter,
        audit.clone(),
        clock.clone(),
        AuthConfig::new(),
    );
    Harness {
        service,
        clock,
        credentials,
        audit,
    }
}

impl Harness {
    fn seed_account(&self, identifier: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.credentials.insert_account(AccountRecord {
            id,
            identifier: identifier.to_string(),
            password_hash: password::hash(PASSWORD).unwrap(),
            mfa: MfaStatus::Disabled,
        });
        id
    }

    fn login_request(&self, identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            identifier: identifier.to_string(),
            password: SecretString::from(password.to_string()),
            device_token: None,
            client: client_info(),
        }
    }

    async fn enable_mfa(&self, account_id: Uuid) -> (String, Vec<String>) {
        let setup = self.service.mfa_setup(account_id).await.unwrap();
        let code = totp_code(&setup.secret, self.clock.now());
        self.service
            .mfa_confirm_setup(account_id, &code)
            .await
            .unwrap();
        (setup.secret, setup.recovery_codes)
    }

    async fn pending_token(&self, identifier: &str) -> String {
        match self
            .service
            .login(self.login_request(identifier, PASSWORD))
            .await
            .unwrap()
        {
            LoginOutcome::MfaRequired { pending_token } => pending_token,
            LoginOutcome::Authenticated { .. } => panic!("expected MFA to be required"),
        }
    }
}

fn client_info() -> ClientInfo {
    ClientInfo::new(Some("203.0.113.7".to_string()), Some(USER_AGENT.to_string()))
}

fn totp_code(secret_base32: &str, at: DateTime<Utc>) -> String {
    let secret = Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap();
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some("Horaro".to_string()),
        "test".to_string(),
    )
    .unwrap();
    totp.generate(u64::try_from(at.timestamp()).unwrap())
}

fn verify_request(pending_token: &str, code: &str, trust_device: bool) -> MfaVerifyRequest {
    MfaVerifyRequest {
        pending_token: pending_token.to_string(),
        code: code.to_string(),
        trust_device,
        device_name: None,
        client: client_info(),
    }
}

#[tokio::test]
async fn login_without_mfa_issues_a_full_session() {
    let harness = harness();
    harness.seed_account("alice@example.com");

    let outcome = harness
        .service
        .login(harness.login_request("Alice@Example.COM", PASSWORD))
        .await
        .unwrap();
    let LoginOutcome::Authenticated {
        session_token,
        account,
    } = outcome
    else {
        panic!("expected a full session");
    };
    assert_eq!(account.identifier, "alice@example.com");
    assert!(!account.mfa_enabled);

    let summary = harness
        .service
        .authenticate_session(&session_token)
        .await
        .unwrap()
        .expect("session should resolve");
    assert_eq!(summary.identifier, "alice@example.com");

    harness.service.logout(&session_token).await.unwrap();
    assert!(harness
        .service
        .authenticate_session(&session_token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn login_failures_are_generic() {
    let harness = harness();
    harness.seed_account("alice@example.com");

    let unknown = harness
        .service
        .login(harness.login_request("nobody@example.com", PASSWORD))
        .await;
    let wrong = harness
        .service
        .login(harness.login_request("alice@example.com", "malĝusta"))
        .await;

    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn mfa_enabled_login_requires_verification() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;

    // A pending token is not a session token.
    assert!(harness
        .service
        .authenticate_session(&pending)
        .await
        .unwrap()
        .is_none());

    let code = totp_code(&secret, harness.clock.now());
    let verified = harness
        .service
        .mfa_verify(verify_request(&pending, &code, false))
        .await
        .unwrap();
    assert!(verified.device_token.is_none());
    assert!(verified.account.mfa_enabled);

    assert!(harness
        .service
        .authenticate_session(&verified.session_token)
        .await
        .unwrap()
        .is_some());

    // The pending token was consumed by the successful verification.
    let code = totp_code(&secret, harness.clock.now());
    let replay = harness
        .service
        .mfa_verify(verify_request(&pending, &code, false))
        .await;
    assert!(matches!(replay, Err(AuthError::InvalidPendingToken)));
}

#[tokio::test]
async fn expired_pending_token_is_rejected() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;
    harness.clock.advance(Duration::minutes(6));

    let code = totp_code(&secret, harness.clock.now());
    let result = harness
        .service
        .mfa_verify(verify_request(&pending, &code, false))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidPendingToken)));
}

#[tokio::test]
async fn five_bad_codes_lock_out_even_a_correct_sixth() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;

    for attempt in 1..=5u32 {
        let result = harness
            .service
            .mfa_verify(verify_request(&pending, "000000", false))
            .await;
        match result {
            Err(AuthError::InvalidCode { attempts_left }) => {
                assert_eq!(attempts_left, Some(5 - attempt));
            }
            other => panic!("attempt {attempt}: expected InvalidCode, got {other:?}"),
        }
    }

    let code = totp_code(&secret, harness.clock.now());
    let sixth = harness
        .service
        .mfa_verify(verify_request(&pending, &code, false))
        .await;
    match sixth {
        Err(AuthError::RateLimited {
            retry_after_seconds,
        }) => assert!(retry_after_seconds > 0),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn lockout_expires_and_verification_recovers() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;
    for _ in 0..5 {
        let _ = harness
            .service
            .mfa_verify(verify_request(&pending, "000000", false))
            .await;
    }

    // Login is locked for the same (client, account) key too.
    let locked_login = harness
        .service
        .login(harness.login_request("alice@example.com", PASSWORD))
        .await;
    assert!(matches!(locked_login, Err(AuthError::RateLimited { .. })));

    harness.clock.advance(Duration::minutes(16));

    let pending = harness.pending_token("alice@example.com").await;
    let code = totp_code(&secret, harness.clock.now());
    assert!(harness
        .service
        .mfa_verify(verify_request(&pending, &code, false))
        .await
        .is_ok());
}

#[tokio::test]
async fn trusted_device_bypasses_mfa_but_not_the_password() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;
    let code = totp_code(&secret, harness.clock.now());
    let verified = harness
        .service
        .mfa_verify(verify_request(&pending, &code, true))
        .await
        .unwrap();
    let device_token = verified.device_token.expect("device token requested");

    // Correct password + trusted device: straight to a session.
    let mut request = harness.login_request("alice@example.com", PASSWORD);
    request.device_token = Some(device_token.clone());
    let outcome = harness.service.login(request).await.unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));

    // Wrong password is never forgiven, device token or not.
    let mut request = harness.login_request("alice@example.com", "malĝusta");
    request.device_token = Some(device_token.clone());
    let outcome = harness.service.login(request).await;
    assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));

    // Trust is fixed-lifetime: 30 days after issuance it is gone.
    harness.clock.advance(Duration::days(30));
    let mut request = harness.login_request("alice@example.com", PASSWORD);
    request.device_token = Some(device_token);
    let outcome = harness.service.login(request).await.unwrap();
    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
}

#[tokio::test]
async fn revoking_all_devices_removes_the_bypass() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let pending = harness.pending_token("alice@example.com").await;
    let code = totp_code(&secret, harness.clock.now());
    let verified = harness
        .service
        .mfa_verify(verify_request(&pending, &code, true))
        .await
        .unwrap();
    let device_token = verified.device_token.unwrap();

    assert_eq!(
        harness.service.list_trusted_devices(account_id).await.unwrap().len(),
        1
    );
    assert_eq!(
        harness
            .service
            .revoke_all_trusted_devices(account_id)
            .await
            .unwrap(),
        1
    );
    assert!(harness
        .service
        .list_trusted_devices(account_id)
        .await
        .unwrap()
        .is_empty());

    let mut request = harness.login_request("alice@example.com", PASSWORD);
    request.device_token = Some(device_token);
    let outcome = harness.service.login(request).await.unwrap();
    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
}

#[tokio::test]
async fn recovery_codes_are_single_use() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (_secret, codes) = harness.enable_mfa(account_id).await;
    assert_eq!(codes.len(), 8);

    let before = harness
        .credentials
        .recovery_code_hashes(account_id)
        .await
        .unwrap()
        .len();

    let pending = harness.pending_token("alice@example.com").await;
    let verified = harness
        .service
        .mfa_verify(verify_request(&pending, &codes[0], false))
        .await;
    assert!(verified.is_ok());

    let after = harness
        .credentials
        .recovery_code_hashes(account_id)
        .await
        .unwrap()
        .len();
    assert_eq!(after, before - 1);

    // The same code a second time is just an invalid code.
    let pending = harness.pending_token("alice@example.com").await;
    let replay = harness
        .service
        .mfa_verify(verify_request(&pending, &codes[0], false))
        .await;
    assert!(matches!(replay, Err(AuthError::InvalidCode { .. })));
}

#[tokio::test]
async fn a_second_setup_invalidates_the_first_secret() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");

    let first = harness.service.mfa_setup(account_id).await.unwrap();
    let second = harness.service.mfa_setup(account_id).await.unwrap();
    assert_ne!(first.secret, second.secret);

    let stale_code = totp_code(&first.secret, harness.clock.now());
    let result = harness
        .service
        .mfa_confirm_setup(account_id, &stale_code)
        .await;
    assert!(matches!(result, Err(AuthError::InvalidCode { .. })));

    let fresh_code = totp_code(&second.secret, harness.clock.now());
    harness
        .service
        .mfa_confirm_setup(account_id, &fresh_code)
        .await
        .unwrap();

    // Confirming twice is already-enabled, not idempotent success.
    let fresh_code = totp_code(&second.secret, harness.clock.now());
    let again = harness
        .service
        .mfa_confirm_setup(account_id, &fresh_code)
        .await;
    assert!(matches!(again, Err(AuthError::MfaAlreadyEnabled)));
}

#[tokio::test]
async fn mfa_disable_clears_factor_codes_and_devices() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    // Trust a device first so disable has something to revoke.
    let pending = harness.pending_token("alice@example.com").await;
    let code = totp_code(&secret, harness.clock.now());
    harness
        .service
        .mfa_verify(verify_request(&pending, &code, true))
        .await
        .unwrap();

    let code = totp_code(&secret, harness.clock.now());
    harness
        .service
        .mfa_disable(
            account_id,
            &SecretString::from(PASSWORD.to_string()),
            &code,
        )
        .await
        .unwrap();

    let account = harness
        .credentials
        .find_by_id(account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.mfa, MfaStatus::Disabled);
    assert!(harness
        .credentials
        .recovery_code_hashes(account_id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness
        .service
        .list_trusted_devices(account_id)
        .await
        .unwrap()
        .is_empty());

    // Login no longer requires MFA.
    let outcome = harness
        .service
        .login(harness.login_request("alice@example.com", PASSWORD))
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));
}

#[tokio::test]
async fn regenerating_recovery_codes_invalidates_the_old_batch() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, old_codes) = harness.enable_mfa(account_id).await;

    let code = totp_code(&secret, harness.clock.now());
    let new_codes = harness
        .service
        .regenerate_recovery_codes(
            account_id,
            &SecretString::from(PASSWORD.to_string()),
            &code,
        )
        .await
        .unwrap();
    assert_eq!(new_codes.len(), 8);

    // Old codes are dead; new ones work.
    let pending = harness.pending_token("alice@example.com").await;
    let stale = harness
        .service
        .mfa_verify(verify_request(&pending, &old_codes[0], false))
        .await;
    assert!(matches!(stale, Err(AuthError::InvalidCode { .. })));

    let pending = harness.pending_token("alice@example.com").await;
    assert!(harness
        .service
        .mfa_verify(verify_request(&pending, &new_codes[0], false))
        .await
        .is_ok());
}

#[tokio::test]
async fn audit_trail_covers_the_whole_flow() {
    let harness = harness();
    let account_id = harness.seed_account("alice@example.com");
    let (secret, _codes) = harness.enable_mfa(account_id).await;

    let _ = harness
        .service
        .login(harness.login_request("alice@example.com", "malĝusta"))
        .await;
    let pending = harness.pending_token("alice@example.com").await;
    let code = totp_code(&secret, harness.clock.now());
    harness
        .service
        .mfa_verify(verify_request(&pending, &code, true))
        .await
        .unwrap();

    let kinds = harness.audit.kinds();
    for expected in [
        AuditKind::MfaSetupStarted,
        AuditKind::MfaEnabled,
        AuditKind::LoginFailed,
        AuditKind::LoginSucceeded,
        AuditKind::TrustedDeviceIssued,
        AuditKind::MfaVerified,
    ] {
        assert!(kinds.contains(&expected), "missing audit kind {expected:?}");
    }

    // Client identity is attached; the password never is.
    let events = harness.audit.events();
    assert!(events
        .iter()
        .any(|event| event.ip.as_deref() == Some("203.0.113.7")));
    let serialized = serde_json::to_string(&events).unwrap();
    assert!(!serialized.contains(PASSWORD));
}
