//! Per-key refresh state machine.
//!
//! ```text
//! Idle -> Fetching -> (Updated | FetchFailed) -> Idle
//! ```
//!
//! `Updated` and `FetchFailed` are transient: the outcome is recorded in
//! `last_outcome` and the key settles back to `Idle` in the same step.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::backoff::Backoff;
use crate::cache::CacheKey;

/// Phase of a key's refresh cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshPhase {
    Idle,
    Fetching,
    Updated,
    FetchFailed,
}

impl std::fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Updated => write!(f, "Updated"),
            Self::FetchFailed => write!(f, "FetchFailed"),
        }
    }
}

/// Refresh bookkeeping for one cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyState {
    /// Current phase (`Idle` or `Fetching` between calls).
    pub phase: RefreshPhase,
    /// `Updated` or `FetchFailed` for the last finished attempt.
    pub last_outcome: Option<RefreshPhase>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Delay until the next scheduled attempt, including backoff.
    pub next_delay: Duration,
    /// Earliest time an on-demand attempt may run; `None` means any time.
    pub retry_not_before: Option<Instant>,
}

impl KeyState {
    fn new(base_interval: Duration) -> Self {
        Self {
            phase: RefreshPhase::Idle,
            last_outcome: None,
            consecutive_failures: 0,
            next_delay: base_interval,
            retry_not_before: None,
        }
    }

    fn begin(&mut self) {
        self.phase = RefreshPhase::Fetching;
    }

    fn succeed(&mut self, base_interval: Duration) {
        self.last_outcome = Some(RefreshPhase::Updated);
        self.consecutive_failures = 0;
        self.next_delay = base_interval;
        self.retry_not_before = None;
        self.phase = RefreshPhase::Idle;
    }

    fn fail(&mut self, base_interval: Duration, backoff: &Backoff, now: Instant) {
        self.last_outcome = Some(RefreshPhase::FetchFailed);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_delay = backoff.delay(base_interval, self.consecutive_failures);
        self.retry_not_before = now.checked_add(self.next_delay);
        self.phase = RefreshPhase::Idle;
    }

    /// Whether an on-demand attempt is allowed at `now`.
    pub fn may_attempt_at(&self, now: Instant) -> bool {
        match self.retry_not_before {
            Some(not_before) => now >= not_before,
            None => true,
        }
    }
}

/// State machines for every key the scheduler has touched.
pub(crate) struct RefreshStates {
    states: Mutex<HashMap<CacheKey, KeyState>>,
    backoff: Backoff,
}

impl RefreshStates {
    pub(crate) fn new(backoff: Backoff) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<CacheKey, KeyState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Refresh state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<KeyState> {
        self.lock_states().get(key).cloned()
    }

    pub(crate) fn begin(&self, key: &CacheKey, base_interval: Duration) {
        let mut states = self.lock_states();
        let state = states
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(base_interval));
        state.begin();
        debug!("Refresh '{}': {}", key, state.phase);
    }

    pub(crate) fn succeed(&self, key: &CacheKey, base_interval: Duration) -> KeyState {
        let mut states = self.lock_states();
        let state = states
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(base_interval));
        state.succeed(base_interval);
        debug!("Refresh '{}': Updated -> Idle", key);
        state.clone()
    }

    pub(crate) fn fail(&self, key: &CacheKey, base_interval: Duration) -> KeyState {
        let mut states = self.lock_states();
        let state = states
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(base_interval));
        state.fail(base_interval, &self.backoff, Instant::now());
        debug!(
            "Refresh '{}': FetchFailed -> Idle ({} consecutive, next in {:?})",
            key, state.consecutive_failures, state.next_delay
        );
        state.clone()
    }

    /// Whether an on-demand attempt for `key` is allowed now.
    pub(crate) fn may_attempt(&self, key: &CacheKey) -> bool {
        self.lock_states()
            .get(key)
            .map_or(true, |state| state.may_attempt_at(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_cycle_settles_to_idle() {
        let states = RefreshStates::new(Backoff::new(8));
        let key = CacheKey::series("SPY");

        states.begin(&key, BASE);
        assert_eq!(states.get(&key).unwrap().phase, RefreshPhase::Fetching);

        let after = states.succeed(&key, BASE);
        assert_eq!(after.phase, RefreshPhase::Idle);
        assert_eq!(after.last_outcome, Some(RefreshPhase::Updated));
        assert_eq!(after.next_delay, BASE);
    }

    #[test]
    fn test_failures_back_off_and_success_resets() {
        let states = RefreshStates::new(Backoff::new(8));
        let key = CacheKey::AllQuotes;

        let delays: Vec<Duration> = (0..4)
            .map(|_| {
                states.begin(&key, BASE);
                states.fail(&key, BASE).next_delay
            })
            .collect();
        assert_eq!(delays, vec![BASE * 2, BASE * 4, BASE * 8, BASE * 8]);

        let failed = states.get(&key).unwrap();
        assert_eq!(failed.last_outcome, Some(RefreshPhase::FetchFailed));
        assert_eq!(failed.consecutive_failures, 4);
        assert!(!states.may_attempt(&key));

        let recovered = states.succeed(&key, BASE);
        assert_eq!(recovered.consecutive_failures, 0);
        assert_eq!(recovered.next_delay, BASE);
        assert!(states.may_attempt(&key));
    }

    #[test]
    fn test_retry_gate() {
        let mut state = KeyState::new(BASE);
        let now = Instant::now();
        state.fail(BASE, &Backoff::new(8), now);

        assert!(!state.may_attempt_at(now));
        assert!(!state.may_attempt_at(now + BASE));
        assert!(state.may_attempt_at(now + BASE * 2));
    }

    #[test]
    fn test_unknown_key_may_attempt() {
        let states = RefreshStates::new(Backoff::default());
        assert!(states.may_attempt(&CacheKey::series("NEW")));
        assert!(states.get(&CacheKey::series("NEW")).is_none());
    }
}
