//! PIN attempt accounting and derived lockout state.
//!
//! The log is append-only; lock state is computed from its tail, so it
//! self-heals once the cooldown elapses without any cleanup job.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::clock::Clock;

// Entries older than the cooldown window never influence lock state; keep a
// small tail per key. The effective cap is never below the retry limit, or a
// high limit could shed the very failures that should lock the key.
const MIN_TAIL_PER_KEY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttemptKind {
    User,
    Supervisor,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub principal_id: Uuid,
    pub device_id: Uuid,
    pub kind: AttemptKind,
}

#[derive(Clone, Debug)]
pub struct PinAttempt {
    pub success: bool,
    pub ip: Option<String>,
    pub at: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockState {
    pub locked: bool,
    pub retry_after_seconds: i64,
}

impl LockState {
    const OPEN: Self = Self {
        locked: false,
        retry_after_seconds: 0,
    };
}

pub struct AttemptTracker {
    clock: Arc<dyn Clock>,
    retry_limit: u32,
    tail_cap: usize,
    cooldown: Duration,
    log: Mutex<HashMap<AttemptKey, VecDeque<PinAttempt>>>,
    guards: Mutex<HashMap<AttemptKey, Arc<Mutex<()>>>>,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, retry_limit: u32, cooldown_seconds: i64) -> Self {
        Self {
            clock,
            retry_limit,
            tail_cap: MIN_TAIL_PER_KEY.max(retry_limit as usize + 1),
            cooldown: Duration::seconds(cooldown_seconds),
            log: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize check-verify-record for one (principal, device, kind) key.
    /// Holding the guard across the whole login attempt keeps concurrent
    /// failures from racing past the limit.
    pub async fn guard(&self, key: &AttemptKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut guards = self.guards.lock().await;
            guards.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn record_attempt(&self, key: &AttemptKey, ip: Option<String>, success: bool) {
        let now = self.clock.now();
        let mut log = self.log.lock().await;
        let tail = log.entry(key.clone()).or_default();
        tail.push_back(PinAttempt {
            success,
            ip,
            at: now,
        });
        while tail.len() > self.tail_cap {
            tail.pop_front();
        }
    }

    /// Derived lock state: `retry_limit` consecutive failures since the last
    /// success, all younger than the cooldown window, lock the key until the
    /// cooldown elapses from the most recent failure.
    pub async fn is_locked(&self, key: &AttemptKey) -> LockState {
        let now = self.clock.now();
        let log = self.log.lock().await;
        let Some(tail) = log.get(key) else {
            return LockState::OPEN;
        };

        let mut failures = 0u32;
        let mut last_failure_at = None;
        for attempt in tail.iter().rev() {
            if attempt.success {
                break;
            }
            if now - attempt.at >= self.cooldown {
                break;
            }
            failures += 1;
            if last_failure_at.is_none() {
                last_failure_at = Some(attempt.at);
            }
        }

        if failures < self.retry_limit {
            return LockState::OPEN;
        }
        let Some(last_failure_at) = last_failure_at else {
            return LockState::OPEN;
        };
        let until = last_failure_at + self.cooldown;
        if now >= until {
            return LockState::OPEN;
        }
        let remaining = (until - now).whole_seconds();
        LockState {
            locked: true,
            retry_after_seconds: remaining.max(1),
        }
    }

    /// Failures currently counting toward the lock; exposed for tests and the
    /// race-bound property.
    pub async fn failure_streak(&self, key: &AttemptKey) -> u32 {
        let now = self.clock.now();
        let log = self.log.lock().await;
        let Some(tail) = log.get(key) else { return 0 };
        let mut failures = 0u32;
        for attempt in tail.iter().rev() {
            if attempt.success || now - attempt.at >= self.cooldown {
                break;
            }
            failures += 1;
        }
        failures
    }

    /// Best-effort pruning of entries too old to matter. Not
    /// correctness-critical; lock state already ignores aged entries.
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let cooldown = self.cooldown;
        let mut log = self.log.lock().await;
        let mut removed = 0;
        log.retain(|_, tail| {
            let before = tail.len();
            tail.retain(|attempt| now - attempt.at < cooldown);
            removed += before - tail.len();
            !tail.is_empty()
        });
        removed
    }
}
