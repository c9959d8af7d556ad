//! Requeue rate limiting.
//!
//! The delay for a key is the larger of a per-key exponential backoff and
//! the wait imposed by an overall token bucket shared by all keys.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Default base delay for the per-key backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default cap for the per-key backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Default overall requeue rate.
pub const DEFAULT_QPS: NonZeroU32 = NonZeroU32::new(10).expect("non-zero");

/// Default overall burst.
pub const DEFAULT_BURST: NonZeroU32 = NonZeroU32::new(100).expect("non-zero");

/// Per-key exponential backoff combined with an overall token bucket.
pub struct ControllerRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
    bucket: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl ControllerRateLimiter {
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
        qps: NonZeroU32,
        burst: NonZeroU32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
            bucket: RateLimiter::direct(Quota::per_second(qps).allow_burst(burst)),
            clock: DefaultClock::default(),
        }
    }

    /// Delay before `key` may be processed again. Each call counts as one
    /// more failure for the key.
    pub fn when(&self, key: &str) -> Duration {
        let backoff = self.backoff(key);
        let throttle = match self.bucket.check() {
            Ok(()) => Duration::ZERO,
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        };
        backoff.max(throttle)
    }

    /// Stop tracking `key`, resetting its backoff.
    pub fn forget(&self, key: &str) {
        self.lock_failures().remove(key);
    }

    /// Number of times `key` has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock_failures().get(key).copied().unwrap_or(0)
    }

    fn backoff(&self, key: &str) -> Duration {
        let mut failures = self.lock_failures();
        let count = failures.entry(key.to_string()).or_insert(0);
        let factor = 1u32.checked_shl(*count).unwrap_or(u32::MAX);
        *count = count.saturating_add(1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        // The map holds plain counters, so a poisoned lock is still usable.
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ControllerRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_QPS, DEFAULT_BURST)
    }
}
