//! Retry policy: pure backoff decisions with jitter
//!
//! The deterministic delay curve lives in
//! [`backoff_delay`](RetryPolicy::backoff_delay) so it can be tested
//! without randomness; jitter is layered on top at decision time.

use crate::config::RetryConfig;
use crate::error::ErrorClass;
use rand::Rng;
use std::time::Duration;

/// Decides whether and how long to wait before a repeat attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The policy's retry cap
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Deterministic exponential backoff for a completed attempt
    /// (0-based): `min(initial * multiplier^attempt, max_backoff)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff.as_secs_f64()
            * self.config.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(base.min(self.config.max_backoff.as_secs_f64()))
    }

    /// Backoff with uniform jitter in `[0, delay / 10]` added
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter_cap = delay.as_secs_f64() * 0.1;
        let jitter = if jitter_cap > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_cap)
        } else {
            0.0
        };
        delay + Duration::from_secs_f64(jitter)
    }

    /// Decide whether attempt number `attempt` (0-based count of attempts
    /// already made) may be retried for an error of `class`.
    ///
    /// Only transient errors are ever retried; semantic errors, NotFound,
    /// CircuitOpen, and cancellation are final. Returns the jittered delay
    /// to sleep before the next attempt, or `None` to stop.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> Option<Duration> {
        if class != ErrorClass::Transient {
            return None;
        }
        if attempt >= self.config.max_retries {
            return None;
        }
        Some(self.jittered_delay(attempt))
    }
}

/// Per-call retry bookkeeping, discarded after success or final failure.
#[derive(Debug)]
pub(crate) struct RetryContext {
    policy: RetryPolicy,
    attempt: u32,
    max_attempts: u32,
}

impl RetryContext {
    /// Scope a context to one logical call, optionally overriding the
    /// policy's retry cap.
    pub fn new(policy: &RetryPolicy, max_retries: Option<u32>) -> Self {
        let cap = max_retries.unwrap_or(policy.max_retries());
        Self {
            policy: RetryPolicy::new(
                crate::config::RetryConfig {
                    max_retries: cap,
                    ..policy.config.clone()
                },
            ),
            attempt: 0,
            max_attempts: cap + 1,
        }
    }

    /// Attempts made so far (including the in-flight one)
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    /// Record a failed attempt and return the delay before the next one,
    /// or `None` when the call is out of attempts or the error class is
    /// not retryable.
    pub fn next_delay(&mut self, class: ErrorClass) -> Option<Duration> {
        let delay = self.policy.decide(self.attempt, class)?;
        self.attempt += 1;
        debug_assert!(self.attempt < self.max_attempts);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::default())
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let p = policy();
        let mut last = Duration::ZERO;
        for attempt in 0..20 {
            let delay = p.backoff_delay(attempt);
            assert!(delay >= last, "backoff decreased at attempt {attempt}");
            assert!(delay <= Duration::from_secs(10));
            last = delay;
        }
        // 100ms * 2^0 .. 2^2
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(400));
        // Far past the cap.
        assert_eq!(p.backoff_delay(19), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let p = policy();
        for attempt in 0..8 {
            let base = p.backoff_delay(attempt);
            for _ in 0..50 {
                let jittered = p.jittered_delay(attempt);
                assert!(jittered >= base);
                assert!(
                    jittered.as_secs_f64() <= base.as_secs_f64() * 1.1 + f64::EPSILON,
                    "jitter exceeded 10% at attempt {attempt}"
                );
            }
        }
    }

    #[test]
    fn only_transient_errors_are_retried() {
        let p = policy();
        assert!(p.decide(0, ErrorClass::Transient).is_some());
        assert!(p.decide(0, ErrorClass::Semantic).is_none());
        assert!(p.decide(0, ErrorClass::NotFound).is_none());
        assert!(p.decide(0, ErrorClass::CircuitOpen).is_none());
        assert!(p.decide(0, ErrorClass::Cancelled).is_none());
    }

    #[test]
    fn stops_after_max_retries() {
        let p = policy();
        assert!(p.decide(2, ErrorClass::Transient).is_some());
        assert!(p.decide(3, ErrorClass::Transient).is_none());
        assert!(p.decide(10, ErrorClass::Transient).is_none());
    }

    #[test]
    fn context_counts_attempts() {
        let mut ctx = RetryContext::new(&policy(), Some(2));
        assert_eq!(ctx.attempts(), 1);
        assert!(ctx.next_delay(ErrorClass::Transient).is_some());
        assert!(ctx.next_delay(ErrorClass::Transient).is_some());
        assert!(ctx.next_delay(ErrorClass::Transient).is_none());
        assert_eq!(ctx.attempts(), 3);
    }

    #[test]
    fn context_zero_retries_never_delays() {
        let mut ctx = RetryContext::new(&policy(), Some(0));
        assert!(ctx.next_delay(ErrorClass::Transient).is_none());
        assert_eq!(ctx.attempts(), 1);
    }
}
