//! Per-source circuit breaker.
//!
//! Stops hammering a source that is failing or blocking us, giving it a
//! cooldown before probing again.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures in window]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                                   |
//!                                                 <--[failure]--                    |
//!                                                                                   |
//! CLOSED <----------------------------[M successes]--------------------------------+
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ScrapeError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - probe requests allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` before the circuit opens.
    pub failure_threshold: u32,

    /// Sliding window over which failures are counted; older failures are
    /// pruned and stop counting toward the threshold.
    pub failure_window: Duration,

    /// Consecutive successes in half-open state to close the circuit.
    pub success_threshold: u32,

    /// Time to wait after the last failure before probing again.
    pub reset_timeout: Duration,

    /// When the source rate-limits us, multiply the reset timeout by this
    /// factor on each trip.
    pub rate_limit_backoff_multiplier: f32,

    /// Ceiling on the reset timeout after rate-limit backoffs.
    pub max_reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            rate_limit_backoff_multiplier: 2.0,
            max_reset_timeout: Duration::from_secs(300),
        }
    }
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    /// Failure instants within the sliding window, oldest first.
    failures: Vec<Instant>,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    current_reset_timeout: Duration,
}

impl CircuitBreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: Vec::new(),
            success_count: 0,
            last_failure_time: None,
            last_error_message: None,
            current_reset_timeout: config.reset_timeout,
        }
    }

    fn prune_window(&mut self, window: Duration) {
        let now = Instant::now();
        self.failures
            .retain(|t| now.duration_since(*t) < window);
    }
}

/// Statistics about circuit breaker state for the health surface.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub source: String,
    pub state: CircuitState,
    /// Failures currently inside the sliding window.
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - request was rejected without touching the source.
    Open { source: String, retry_after: Duration },
    /// The inner operation failed.
    Inner(ScrapeError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open {
                source,
                retry_after,
            } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} ms.",
                    source,
                    retry_after.as_millis()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Thread-safe per-source circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    source: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = CircuitBreakerInner::new(&config);
        Self {
            source: source.into(),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.source, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// True when a request may proceed (closed or half-open probing).
    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// How long until the next probe is admitted, when the circuit is open.
    pub fn retry_after(&self) -> Option<Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        if inner.state != CircuitState::Open {
            return None;
        }
        Some(Self::remaining(&inner))
    }

    fn remaining(inner: &CircuitBreakerInner) -> Duration {
        inner
            .last_failure_time
            .map(|t| {
                let elapsed = t.elapsed();
                if elapsed < inner.current_reset_timeout {
                    inner.current_reset_timeout - elapsed
                } else {
                    Duration::ZERO
                }
            })
            .unwrap_or(inner.current_reset_timeout)
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.prune_window(self.config.failure_window);

        let time_until_half_open = if inner.state == CircuitState::Open {
            Some(Self::remaining(&inner))
        } else {
            None
        };

        CircuitBreakerStats {
            source: self.source.clone(),
            state: inner.state,
            failure_count: inner.failures.len() as u32,
            success_count: inner.success_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: executes operation, transitions based on result
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        {
            let mut inner = self.lock_inner();
            self.maybe_transition_to_half_open(&mut inner);

            if inner.state == CircuitState::Open {
                return Err(CircuitBreakerError::Open {
                    source: self.source.clone(),
                    retry_after: Self::remaining(&inner),
                });
            }
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(e);
                }
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.source,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.success_count = 0;
                    inner.last_error_message = None;
                    inner.current_reset_timeout = self.config.reset_timeout;
                }
            }
            CircuitState::Closed => {
                inner.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &ScrapeError) {
        let mut inner = self.lock_inner();

        let is_rate_limit = matches!(error, ScrapeError::RateLimited);

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push(Instant::now());
                inner.prune_window(self.config.failure_window);
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());

                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.source,
                        failures = inner.failures.len(),
                        error = %error,
                        "Circuit breaker opening after {} failures within window",
                        inner.failures.len()
                    );
                    inner.state = CircuitState::Open;

                    if is_rate_limit {
                        inner.current_reset_timeout = self.extended_timeout(&inner);
                        tracing::info!(
                            circuit = %self.source,
                            reset_timeout_secs = inner.current_reset_timeout.as_secs(),
                            "Extended reset timeout due to rate limit"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.source,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.failures.push(Instant::now());
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                inner.success_count = 0;

                if is_rate_limit {
                    inner.current_reset_timeout = self.extended_timeout(&inner);
                }
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    fn extended_timeout(&self, inner: &CircuitBreakerInner) -> Duration {
        std::cmp::min(
            Duration::from_secs_f32(
                inner.current_reset_timeout.as_secs_f32()
                    * self.config.rate_limit_backoff_multiplier,
            ),
            self.config.max_reset_timeout,
        )
    }

    /// Force the circuit back to closed (operational override).
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.source, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.success_count = 0;
        inner.last_failure_time = None;
        inner.last_error_message = None;
        inner.current_reset_timeout = self.config.reset_timeout;
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= inner.current_reset_timeout
        {
            tracing::info!(
                circuit = %self.source,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net_err() -> ScrapeError {
        ScrapeError::Network("connection reset".into())
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..3 {
            cb.record_failure(&net_err());
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
        assert!(cb.retry_after().is_some());
    }

    #[test]
    fn test_circuit_stays_closed_below_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..4 {
            cb.record_failure(&net_err());
        }

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_millis(20),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&net_err());
        cb.record_failure(&net_err());
        std::thread::sleep(Duration::from_millis(30));
        cb.record_failure(&net_err());

        // Only the third failure is still inside the window.
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 1);
    }

    #[test]
    fn test_success_clears_failure_window() {
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..4 {
            cb.record_failure(&net_err());
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure(&net_err());
        }

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_transitions_to_half_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&net_err());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_single_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&net_err());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_rate_limit_extends_reset_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            rate_limit_backoff_multiplier: 2.0,
            max_reset_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&ScrapeError::RateLimited);

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.time_until_half_open.unwrap() > Duration::from_secs(55));
    }

    #[test]
    fn test_rate_limit_backoff_capped_at_max() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(200),
            rate_limit_backoff_multiplier: 2.0,
            max_reset_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&ScrapeError::RateLimited);

        let stats = cb.stats();
        assert!(stats.time_until_half_open.unwrap() <= Duration::from_secs(300));
    }

    #[test]
    fn test_manual_reset() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_config_error_does_not_trip_via_call_filter() {
        // should_trip_circuit is the filter used by call(); a config error
        // recorded through it must leave the breaker closed.
        let err = ScrapeError::Config {
            source_id: "test".into(),
            message: "missing api config".into(),
        };
        assert!(!err.should_trip_circuit());
    }

    #[tokio::test]
    async fn test_call_returns_open_error_when_circuit_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);
        cb.record_failure(&net_err());

        let result = cb
            .call(|| async { Ok::<_, ScrapeError>("should not execute".to_string()) })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_call_executes_when_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let result = cb
            .call(|| async { Ok::<_, ScrapeError>("success".to_string()) })
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_call_records_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("test", config);

        let _ = cb
            .call(|| async { Err::<String, _>(net_err()) })
            .await;

        let stats = cb.stats();
        assert_eq!(stats.failure_count, 1);
    }
}
