//! Exponential backoff between refresh attempts.

use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// After `n` consecutive failures the delay is `base × min(2^n, cap)`;
/// with no failures it is the base interval itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    cap_multiplier: u32,
}

impl Backoff {
    /// `cap_multiplier` below 1 is treated as 1.
    pub fn new(cap_multiplier: u32) -> Self {
        Self {
            cap_multiplier: cap_multiplier.max(1),
        }
    }

    pub fn cap_multiplier(&self) -> u32 {
        self.cap_multiplier
    }

    /// Multiplier applied to the base interval after `failures` consecutive failures.
    pub fn multiplier(&self, failures: u32) -> u32 {
        2u32.checked_pow(failures)
            .unwrap_or(u32::MAX)
            .min(self.cap_multiplier)
    }

    /// Delay before the next attempt.
    pub fn delay(&self, base: Duration, failures: u32) -> Duration {
        base.saturating_mul(self.multiplier(failures))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BACKOFF_CAP_MULTIPLIER)
    }
}
