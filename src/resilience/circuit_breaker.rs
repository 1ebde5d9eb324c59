//! Failure-ratio circuit breaker.
//!
//! One [`CircuitBreaker`] guards one logical target (in this crate: the
//! outbound webhook HTTP call). State is process-local — different worker
//! replicas may disagree on open/closed, which is intentional: the breaker
//! is a local rate-limiter, not a consensus mechanism.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn label(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Minimum observations in the rolling window before the failure ratio
    /// is considered meaningful.
    pub min_requests: u32,
    /// Failure ratio (0.0-1.0) at or above which the breaker trips open.
    pub failure_ratio: f64,
    /// Cool-off duration before an OPEN breaker allows a trial call.
    pub open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 5,
            failure_ratio: 0.5,
            open_for: Duration::from_secs(30),
        }
    }
}

struct Counters {
    state: BreakerState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Failure-ratio breaker with CLOSED / OPEN / HALF_OPEN states.
///
/// The only mutable shared state in this crate's in-process concurrency
/// model lives here, behind a single mutex.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    counters: Mutex<Counters>,
}

/// Returned by [`CircuitBreaker::allow`] when the circuit is open.
#[derive(Debug, Clone, Copy)]
pub struct BreakerOpenError;

impl std::fmt::Display for BreakerOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit open")
    }
}

impl std::error::Error for BreakerOpenError {}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            counters: Mutex::new(Counters {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.counters.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Whether a call may proceed right now. OPEN transitions to HALF_OPEN
    /// as a side effect once the cool-off has elapsed and a call is
    /// attempted.
    pub fn allow(&self) -> Result<(), BreakerOpenError> {
        let mut counters = self.counters.lock().expect("circuit breaker mutex poisoned");
        if counters.state == BreakerState::Open {
            let opened_at = counters.opened_at.expect("OPEN state always has opened_at set");
            if opened_at.elapsed() >= self.config.open_for {
                self.transition(&mut counters, BreakerState::HalfOpen);
            } else {
                return Err(BreakerOpenError);
            }
        }
        Ok(())
    }

    /// Record a call outcome and evaluate state transitions.
    pub fn record(&self, success: bool) {
        let mut counters = self.counters.lock().expect("circuit breaker mutex poisoned");
        match counters.state {
            BreakerState::HalfOpen => {
                if success {
                    self.transition(&mut counters, BreakerState::Closed);
                } else {
                    self.transition(&mut counters, BreakerState::Open);
                }
            }
            BreakerState::Closed => {
                if success {
                    counters.successes += 1;
                } else {
                    counters.failures += 1;
                }
                self.halve_if_saturated(&mut counters);
                let total = counters.failures + counters.successes;
                if total >= self.config.min_requests && counters.failures as f64 / total as f64 >= self.config.failure_ratio {
                    self.transition(&mut counters, BreakerState::Open);
                }
            }
            BreakerState::Open => {
                // A call outcome while OPEN can only happen through a race
                // with `allow`; ignore it, the next `allow` will re-evaluate.
            }
        }
    }

    /// Prevents failures/successes from growing unboundedly under a long
    /// CLOSED run by halving both counters once the window exceeds twice
    /// `min_requests`.
    fn halve_if_saturated(&self, counters: &mut Counters) {
        let total = counters.failures + counters.successes;
        if total > 2 * self.config.min_requests {
            counters.failures /= 2;
            counters.successes /= 2;
        }
    }

    fn transition(&self, counters: &mut Counters, to: BreakerState) {
        let from = counters.state;
        counters.state = to;
        counters.failures = 0;
        counters.successes = 0;
        counters.opened_at = if to == BreakerState::Open { Some(Instant::now()) } else { None };
        counter!("webhook_circuit_transitions_total", "target" => self.name.clone(), "from" => from.label(), "to" => to.label())
            .increment(1);
        if from != to {
            tracing::info!(target = %self.name, from = from.label(), to = to.label(), "circuit breaker transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                min_requests: 4,
                failure_ratio: 0.5,
                open_for: Duration::from_millis(20),
            },
        )
    }

    #[test]
    fn closed_allows_calls() {
        let b = breaker();
        assert!(b.allow().is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn trips_open_after_failure_ratio_exceeded() {
        let b = breaker();
        for _ in 0..4 {
            b.allow().unwrap();
            b.record(false);
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow().is_err());
    }

    #[test]
    fn stays_closed_below_min_requests() {
        let b = breaker();
        b.allow().unwrap();
        b.record(false);
        b.allow().unwrap();
        b.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_cooloff_closes_on_success() {
        let b = breaker();
        for _ in 0..4 {
            b.allow().unwrap();
            b.record(false);
        }
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.allow().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(true);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_failure() {
        let b = breaker();
        for _ in 0..4 {
            b.allow().unwrap();
            b.record(false);
        }
        std::thread::sleep(Duration::from_millis(25));
        b.allow().unwrap();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(false);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn counters_halve_once_saturated() {
        let b = breaker();
        // 8 successes keeps it well below the failure ratio but exceeds
        // 2*min_requests, exercising the halving path without tripping.
        for _ in 0..9 {
            b.allow().unwrap();
            b.record(true);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
