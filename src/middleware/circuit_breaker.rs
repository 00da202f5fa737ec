use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast until the cooldown elapses
    Open,
    /// Cooldown elapsed; probe calls decide whether to close again
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before probe calls are allowed
    pub cooldown: Duration,
    /// Consecutive probe successes that close the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Health gate for an external dependency.
///
/// The translation gateway reports "not ready" while this is open, which
/// makes the pipeline refuse new captures instead of failing every region.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<BreakerState>>,
    config: CircuitBreakerConfig,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at: Option<Instant>,
    trips: usize,
    total_failures: usize,
    total_successes: usize,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trips: 0,
                total_failures: 0,
                total_successes: 0,
            })),
            config,
        }
    }

    fn cooled_down(&self, inner: &BreakerState) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.cooldown)
            .unwrap_or(true)
    }

    /// Whether a call would currently be let through. Does not change state.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.cooled_down(&inner),
        }
    }

    /// Gate a call; moves Open → HalfOpen once the cooldown has elapsed
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.cooled_down(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;

        if inner.state != CircuitState::Closed {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
            } else {
                inner.state = CircuitState::HalfOpen;
            }
        }
    }

    /// Record a failed call. Returns true if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.write();
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        let trips = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trips {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trips += 1;
        }
        trips
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trips: inner.trips,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub trips: usize,
    pub total_failures: usize,
    pub total_successes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: usize, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold,
            cooldown: Duration::from_millis(cooldown_ms),
            success_threshold: 2,
        })
    }

    #[test]
    fn consecutive_failures_open_the_circuit() {
        let breaker = breaker(3, 1000);
        assert!(breaker.is_ready());

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_ready());
        assert!(!breaker.allow_request());
        assert_eq!(breaker.stats().trips, 1);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = breaker(2, 1000);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn recovers_through_half_open() {
        let breaker = breaker(2, 50);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_ready());

        std::thread::sleep(Duration::from_millis(80));

        // Readiness is observable without consuming the probe
        assert!(breaker.is_ready());
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = breaker(2, 50);
        breaker.record_failure();
        breaker.record_failure();

        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.allow_request());

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_ready());
        assert_eq!(breaker.stats().trips, 2);
    }
}
