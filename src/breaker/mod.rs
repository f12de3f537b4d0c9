//! Circuit breaker: per-service tri-state gate over outbound calls
//!
//! One breaker exists per service name, created lazily on first call and
//! living for the client's lifetime. The Open→HalfOpen transition is
//! discovered lazily inside [`is_open`](CircuitBreaker::is_open) /
//! [`try_acquire`](CircuitBreaker::try_acquire) rather than by a timer
//! task; the single state mutex guarantees the transition happens once
//! even under concurrent queries.


use crate::config::BreakerConfig;
use crate::error::{ErrorClass, TetherError, TetherResult};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected immediately
    Open,
    /// A bounded number of probe calls are admitted
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_probes: u32,
}

/// Failure-triggered call suppression for one service.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a service
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_probes: 0,
            }),
        }
    }

    /// Apply the lazy Open→HalfOpen transition. Caller holds the lock.
    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let elapsed_enough = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_time)
                .unwrap_or(true);
            if elapsed_enough {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_probes = 0;
                info!(service = %self.service, "circuit half-open, admitting probe calls");
            }
        }
    }

    /// Whether the circuit is (still) open.
    ///
    /// Performs the time-based Open→HalfOpen transition as a side effect of
    /// being queried. Returns `true` only for a true Open state.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state == CircuitState::Open
    }

    /// Current state, with the lazy transition applied
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Admit one call attempt.
    ///
    /// Rejects with [`TetherError::CircuitOpen`] when the circuit is open,
    /// or when it is half-open and the concurrent probe cap is already
    /// reached (beyond-cap callers see the same rejection as an open
    /// circuit). On admission the returned permit must be resolved with
    /// exactly one success / failure / cancel, which the permit's `Drop`
    /// enforces for early-return paths.
    pub fn try_acquire(&self) -> TetherResult<BreakerPermit<'_>> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            CircuitState::Open => Err(TetherError::circuit_open(&self.service)),
            CircuitState::HalfOpen => {
                if inner.half_open_probes >= self.config.half_open_max_probes {
                    debug!(service = %self.service, "half-open probe cap reached");
                    return Err(TetherError::circuit_open(&self.service));
                }
                inner.half_open_probes += 1;
                Ok(BreakerPermit {
                    breaker: self,
                    resolved: false,
                })
            }
            CircuitState::Closed => Ok(BreakerPermit {
                breaker: self,
                resolved: false,
            }),
        }
    }

    /// Record a successful call.
    ///
    /// Half-open: closes the circuit and resets the failure count.
    /// Closed: resets the failure count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.half_open_probes = inner.half_open_probes.saturating_sub(1);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_probes = 0;
                info!(service = %self.service, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    ///
    /// Closed: opens the circuit once the failure threshold is reached.
    /// Half-open: reopens unconditionally.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.half_open_probes = inner.half_open_probes.saturating_sub(1);
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        service = %self.service,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_probes = 0;
                warn!(service = %self.service, "circuit reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Release an admitted attempt without recording an outcome
    /// (cancellation, pool shutdown).
    fn cancel_attempt(&self) {
        let mut inner = self.inner.lock();
        inner.half_open_probes = inner.half_open_probes.saturating_sub(1);
    }

    /// Whether an error of this class feeds [`record_failure`](Self::record_failure)
    pub fn counts_as_failure(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::Transient => true,
            ErrorClass::Semantic => self.config.count_semantic_failures,
            ErrorClass::NotFound | ErrorClass::CircuitOpen | ErrorClass::Cancelled => false,
        }
    }

    /// Current consecutive failure count (test and diagnostics accessor)
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}

/// An admitted call attempt.
///
/// Must be resolved exactly once: [`success`](Self::success),
/// [`failure`](Self::failure), or [`observe`](Self::observe). Dropping an
/// unresolved permit releases the half-open probe slot without recording
/// an outcome, so cancellation and early returns cannot leak probe slots.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl BreakerPermit<'_> {
    /// Record the attempt as successful
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    /// Record the attempt as failed
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }

    /// Resolve the permit from an error, honoring the semantic-counting
    /// policy. Errors whose class never counts (cancellation) release the
    /// slot without an outcome.
    pub fn observe(mut self, err: &TetherError) {
        self.resolved = true;
        if self.breaker.counts_as_failure(err.class()) {
            self.breaker.record_failure();
        } else {
            self.breaker.cancel_attempt();
        }
    }

    /// The breaker this permit belongs to
    pub fn breaker(&self) -> &CircuitBreaker {
        self.breaker
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.cancel_attempt();
        }
    }
}
