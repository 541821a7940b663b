// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Cooldowns applied by the consumer loop between cycles.

use rand::Rng;
use std::time::Duration;

/// Cooldown after the delivery stream could not be obtained
pub const DEFAULT_FETCH_COOLDOWN: Duration = Duration::from_secs(30);
/// Cooldown after the delivery stream closed
pub const DEFAULT_CLOSED_COOLDOWN: Duration = Duration::from_secs(15);
/// Upper bound for exponentially growing cooldowns
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// How long the consumer loop waits before restarting a cycle.
///
/// The defaults are fixed cooldowns. With a `multiplier` above 1 the
/// cooldown grows with every consecutive failed cycle, capped at
/// `max_cooldown`; `jitter` adds up to that fraction of the cooldown at
/// random.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub fetch_cooldown: Duration,
    pub closed_cooldown: Duration,
    pub multiplier: f64,
    pub max_cooldown: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            fetch_cooldown: DEFAULT_FETCH_COOLDOWN,
            closed_cooldown: DEFAULT_CLOSED_COOLDOWN,
            multiplier: 1.0,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed cooldowns.
    pub fn fixed(fetch_cooldown: Duration, closed_cooldown: Duration) -> RetryPolicy {
        RetryPolicy {
            fetch_cooldown,
            closed_cooldown,
            ..RetryPolicy::default()
        }
    }

    pub fn exponential(mut self, multiplier: f64, max_cooldown: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_cooldown = max_cooldown;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Cooldown before retrying after a failed fetch.
    pub fn after_fetch_failure(&self, consecutive_failures: u32) -> Duration {
        self.cooldown(self.fetch_cooldown, consecutive_failures)
    }

    /// Cooldown before redeclaring after the stream closed.
    pub fn after_stream_closed(&self, consecutive_failures: u32) -> Duration {
        self.cooldown(self.closed_cooldown, consecutive_failures)
    }

    fn cooldown(&self, base: Duration, consecutive_failures: u32) -> Duration {
        let cap = self.max_cooldown.max(base);
        let grown = if self.multiplier.is_finite() && self.multiplier > 1.0 {
            let exp = consecutive_failures.saturating_sub(1).min(32) as i32;
            let secs = base.as_secs_f64() * self.multiplier.powi(exp);
            Duration::try_from_secs_f64(secs).map_or(cap, |grown| grown.min(cap))
        } else {
            base
        };

        // the fields are public and may bypass `with_jitter`
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter <= 0.0 {
            return grown;
        }

        let extra = rand::rng().random_range(0.0..=jitter);
        let extra =
            Duration::try_from_secs_f64(grown.as_secs_f64() * extra).unwrap_or(Duration::MAX);
        grown.saturating_add(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fixed() {
        let policy = RetryPolicy::default();

        for failures in 1..10 {
            assert_eq!(policy.after_fetch_failure(failures), Duration::from_secs(30));
            assert_eq!(policy.after_stream_closed(failures), Duration::from_secs(15));
        }
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = RetryPolicy::default().exponential(2.0, Duration::from_secs(100));

        assert_eq!(policy.after_fetch_failure(1), Duration::from_secs(30));
        assert_eq!(policy.after_fetch_failure(2), Duration::from_secs(60));
        assert_eq!(policy.after_fetch_failure(3), Duration::from_secs(100));
        assert_eq!(policy.after_fetch_failure(30), Duration::from_secs(100));
        assert_eq!(policy.after_stream_closed(2), Duration::from_secs(30));
    }

    #[test]
    fn out_of_range_fields_never_panic() {
        let policy = RetryPolicy {
            multiplier: f64::NAN,
            jitter: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.after_fetch_failure(3), Duration::from_secs(30));

        let policy = RetryPolicy {
            multiplier: f64::INFINITY,
            jitter: 7.0,
            ..RetryPolicy::default()
        };
        let cooldown = policy.after_fetch_failure(3);
        assert!(cooldown >= Duration::from_secs(30));
        assert!(cooldown <= Duration::from_secs(60));

        let unbounded = RetryPolicy {
            jitter: 1.0,
            ..RetryPolicy::fixed(Duration::MAX, Duration::from_secs(1))
        }
        .exponential(10.0, Duration::MAX);
        assert_eq!(unbounded.after_fetch_failure(40), Duration::MAX);
        assert!(unbounded.after_stream_closed(40) >= Duration::from_secs(1));
    }

    #[test]
    fn jitter_only_adds() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10), Duration::from_secs(5))
            .with_jitter(0.5);

        for _ in 0..50 {
            let cooldown = policy.after_fetch_failure(1);
            assert!(cooldown >= Duration::from_secs(10));
            assert!(cooldown <= Duration::from_secs(15));
        }
    }
}
