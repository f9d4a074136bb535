//! Sliding-window rate limiting for auth flows.
//!
//! Flow Overview:
//! 1) `check` runs before any expensive verification (Argon2, TOTP) so a
//!    locked key costs nothing but a map lookup.
//! 2) The caller verifies, then calls `record` with the outcome; a request
//!    that failed for unrelated reasons is never counted twice.
//! 3) Five failures inside a 15-minute window lock the key for 15 minutes;
//!    the lock is observed at the next `check`, after which the key is
//!    treated as fresh.
//!
//! The table is process-local and ephemeral. A background sweep drops
//! entries whose window has expired and which are not locked, so steady-state
//! memory stays bounded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;

pub const MAX_ATTEMPTS: u32 = 5;
pub const ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Limiter key: most specific client network identity plus the account id.
///
/// The account id (never the submitted identifier string) keeps case
/// variants of one identifier from spreading across keys. Behind shared
/// NATs the composition over- or under-restricts; that is policy for the
/// embedder to tune, which is why the key is a plain struct and the limiter
/// a trait.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RateLimitKey {
    pub client: String,
    pub account: Uuid,
}

impl RateLimitKey {
    #[must_use]
    pub fn new(client: Option<&str>, account: Uuid) -> Self {
        Self {
            client: client.unwrap_or("unknown").to_string(),
            account,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Locked { retry_after_seconds: u64 },
}

/// Failure counting and lockout for one (client, account) key.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &RateLimitKey) -> Decision;
    fn record(&self, key: &RateLimitKey, success: bool);
    /// Attempts remaining in the current window; surfaced as a hint on
    /// invalid-code responses.
    fn attempts_left(&self, key: &RateLimitKey) -> u32;
}

/// Limiter that never limits; for embedders that enforce limits upstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &RateLimitKey) -> Decision {
        Decision::Allowed
    }

    fn record(&self, _key: &RateLimitKey, _success: bool) {}

    fn attempts_left(&self, _key: &RateLimitKey) -> u32 {
        MAX_ATTEMPTS
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            window: ATTEMPT_WINDOW,
            lockout: LOCKOUT_DURATION,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    failure_count: u32,
    window_start: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

/// In-memory sliding-window limiter.
///
/// One mutex over one map: critical sections are counter arithmetic, so
/// per-key locking would buy nothing. The sweep takes the same lock.
pub struct SlidingWindowLimiter {
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
    entries: Mutex<HashMap<RateLimitKey, Entry>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(clock, RateLimitPolicy::default())
    }

    #[must_use]
    pub fn with_policy(clock: Arc<dyn Clock>, policy: RateLimitPolicy) -> Self {
        Self {
            clock,
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.policy.window).unwrap_or(chrono::Duration::MAX)
    }

    fn lockout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.policy.lockout).unwrap_or(chrono::Duration::MAX)
    }

    /// Drop entries whose window has expired and which are not locked.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let window = self.window();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            let locked = entry.locked_until.is_some_and(|until| now < until);
            locked || now - entry.window_start <= window
        });
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &RateLimitKey) -> Decision {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get(key) else {
            return Decision::Allowed;
        };
        if let Some(locked_until) = entry.locked_until {
            if now < locked_until {
                let retry_after_seconds =
                    u64::try_from((locked_until - now).num_seconds().max(1)).unwrap_or(1);
                return Decision::Locked {
                    retry_after_seconds,
                };
            }
            // Lockout elapsed: the key starts fresh.
            entries.remove(key);
        }
        Decision::Allowed
    }

    fn record(&self, key: &RateLimitKey, success: bool) {
        let now = self.clock.now();
        let window = self.window();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if success {
            entries.remove(key);
            return;
        }

        let entry = entries.entry(key.clone()).or_insert(Entry {
            failure_count: 0,
            window_start: now,
            locked_until: None,
        });
        if now - entry.window_start > window {
            entry.failure_count = 0;
            entry.window_start = now;
            entry.locked_until = None;
        }
        entry.failure_count += 1;
        if entry.failure_count >= self.policy.max_attempts && entry.locked_until.is_none() {
            entry.locked_until = Some(now + self.lockout());
            debug!(
                client = %key.client,
                account = %key.account,
                "rate limit lockout engaged"
            );
        }
    }

    fn attempts_left(&self, key: &RateLimitKey) -> u32 {
        let now = self.clock.now();
        let window = self.window();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if now - entry.window_start <= window => {
                self.policy.max_attempts.saturating_sub(entry.failure_count)
            }
            _ => self.policy.max_attempts,
        }
    }
}

/// Handle to the periodic sweep task; shuts the task down cleanly.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the periodic reclamation sweep for a limiter.
///
/// The task is owned by the returned handle rather than free-running, so
/// tests get isolation and the embedding binary gets a clean shutdown.
#[must_use]
pub fn spawn_sweeper(limiter: Arc<SlidingWindowLimiter>, every: Duration) -> SweeperHandle {
    let (shutdown, mut signal) = watch::channel(false);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(every) => {
                    let removed = limiter.sweep();
                    if removed > 0 {
                        debug!("rate limit sweep removed {removed} entries");
                    }
                }
                _ = signal.changed() => {
                    debug!("rate limit sweeper shutting down");
                    return;
                }
            }
        }
    });
    SweeperHandle { shutdown, task }
}
