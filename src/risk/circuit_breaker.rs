use crate::utils::config::ConfigError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, orders flow
    Closed,
    /// Too many recent failures, orders rejected
    Open,
    /// Cool-down elapsed, probing with live orders
    HalfOpen,
}

impl CircuitState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::HalfOpen,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    pub fn gauge_value(self) -> i64 {
        i64::from(self.as_u8())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit
    pub failure_threshold: usize,
    pub failure_window_secs: u64,
    /// Cool-down before the first probe is allowed
    pub open_timeout_secs: u64,
    /// Consecutive probe successes needed to close again
    pub half_open_max_tries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            open_timeout_secs: 300,
            half_open_max_tries: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.failure_threshold", "must be > 0"));
        }
        if self.failure_window_secs == 0 {
            return Err(ConfigError::invalid("circuit_breaker.failure_window_secs", "must be > 0"));
        }
        if self.half_open_max_tries == 0 {
            return Err(ConfigError::invalid("circuit_breaker.half_open_max_tries", "must be > 0"));
        }
        Ok(())
    }
}

/// Order attempt rejected because the circuit is open
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "circuit open: {failures} failures within {window_secs}s window, retry in {retry_after_secs}s"
)]
pub struct CircuitOpenError {
    pub failures: usize,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&ts) = self.failures.front() {
            if now.saturating_duration_since(ts) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Fault-tolerance gate in front of every order submission.
///
/// Shared across workers behind an `Arc`. Mutations serialize on a mutex;
/// `state()` reads an atomic mirror without locking. Transitions out of Open
/// only happen inside `is_trading_allowed`, checked on demand rather than by a
/// background timer.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    state: AtomicU8,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner::closed()),
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.failure_window_secs)
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.config.open_timeout_secs)
    }

    fn set_state(&self, inner: &mut BreakerInner, state: CircuitState) {
        inner.state = state;
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Current state (lock-free read)
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Failures currently inside the window
    pub fn failure_count(&self) -> usize {
        self.inner.lock().failures.len()
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed order attempt observed at `now`.
    ///
    /// A failure while half-open re-opens the circuit immediately and restarts
    /// the cool-down.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failures.push_back(now);
        inner.prune(now, self.window());

        let state = inner.state;
        match state {
            CircuitState::HalfOpen => {
                inner.opened_at = Some(now);
                inner.half_open_successes = 0;
                self.set_state(&mut inner, CircuitState::Open);
                warn!(
                    failures = inner.failures.len(),
                    "Probe failed while half-open, circuit re-opened"
                );
            }
            CircuitState::Closed if inner.failures.len() >= self.config.failure_threshold => {
                inner.opened_at = Some(now);
                self.set_state(&mut inner, CircuitState::Open);
                warn!(
                    failures = inner.failures.len(),
                    window_secs = self.config.failure_window_secs,
                    "🚨 Circuit breaker OPEN - order submission halted"
                );
            }
            // Already open: keep the original opened_at
            _ => {}
        }
    }

    /// Record a successful order attempt. Only counts while half-open.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }

        inner.half_open_successes += 1;
        if inner.half_open_successes >= self.config.half_open_max_tries {
            inner.failures.clear();
            inner.opened_at = None;
            inner.half_open_successes = 0;
            self.set_state(&mut inner, CircuitState::Closed);
            info!("✅ Circuit breaker closed after successful probes");
        }
    }

    pub fn is_trading_allowed(&self) -> (bool, Option<String>) {
        self.is_trading_allowed_at(Instant::now())
    }

    /// Whether an order may be submitted at `now`.
    ///
    /// Must be called before every order attempt. When the cool-down has
    /// elapsed this call moves Open to HalfOpen and is itself the first probe.
    pub fn is_trading_allowed_at(&self, now: Instant) -> (bool, Option<String>) {
        let mut inner = self.inner.lock();
        match self.admit(&mut inner, now) {
            Ok(note) => (true, note),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    pub fn check(&self) -> Result<(), CircuitOpenError> {
        self.check_at(Instant::now())
    }

    /// Same gate as `is_trading_allowed_at`, as a typed error
    pub fn check_at(&self, now: Instant) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        self.admit(&mut inner, now).map(|_| ())
    }

    /// Gate decision under the caller's lock. `Ok` carries the half-open note.
    fn admit(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
    ) -> Result<Option<String>, CircuitOpenError> {
        inner.prune(now, self.window());

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(None),
            CircuitState::HalfOpen => Ok(Some(format!(
                "circuit half-open: probe {}/{}",
                inner.half_open_successes + 1,
                self.config.half_open_max_tries
            ))),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.open_timeout() {
                    inner.half_open_successes = 0;
                    self.set_state(inner, CircuitState::HalfOpen);
                    info!(
                        open_for_secs = elapsed.as_secs(),
                        "Circuit breaker half-open, allowing probe order"
                    );
                    Ok(Some(format!(
                        "circuit half-open: probe 1/{}",
                        self.config.half_open_max_tries
                    )))
                } else {
                    Err(CircuitOpenError {
                        failures: inner.failures.len(),
                        window_secs: self.config.failure_window_secs,
                        retry_after_secs: (self.open_timeout() - elapsed).as_secs(),
                    })
                }
            }
        }
    }

    /// Manual operator override: force Closed and forget all history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let was = inner.state;
        *inner = BreakerInner::closed();
        self.state.store(CircuitState::Closed.as_u8(), Ordering::Release);
        if was != CircuitState::Closed {
            info!(previous = ?was, "Circuit breaker manually reset");
        }
    }
}
