//! Circuit breaker guarding calls to external providers.
//!
//! ```text
//! Closed --[threshold failures]--> Open --[cooldown]--> HalfOpen
//!   ^                                ^                     |
//!   |                                +------[failure]------+
//!   +----------------------[trial successes]---------------+
//! ```
//!
//! A rejected call surfaces as [`AppError::CircuitOpen`], which is retryable,
//! so a queued job waits out the cooldown through its normal backoff.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive tripping failures that open the circuit.
    pub failure_threshold: u32,
    /// Successful trial calls needed in half-open state to close it again.
    pub success_threshold: u32,
    /// Base cooldown before an open circuit lets a trial call through.
    pub cooldown: Duration,
    /// Cooldown growth factor applied when the provider rate-limits us.
    pub rate_limit_multiplier: f32,
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
            rate_limit_multiplier: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    trial_successes: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
    cooldown: Duration,
}

impl BreakerState {
    fn remaining_cooldown(&self) -> Duration {
        match self.opened_at {
            Some(t) => self.cooldown.saturating_sub(t.elapsed()),
            None => self.cooldown,
        }
    }
}

/// Snapshot of breaker state for diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_error: Option<String>,
    pub retry_after: Option<Duration>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = BreakerState {
            state: CircuitState::Closed,
            failures: 0,
            trial_successes: 0,
            opened_at: None,
            last_error: None,
            cooldown: config.cooldown,
        };
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        });
        if guard.state == CircuitState::Open && guard.remaining_cooldown().is_zero() {
            tracing::info!(circuit = %self.name, "Circuit breaker half-open, probing");
            guard.state = CircuitState::HalfOpen;
            guard.trial_successes = 0;
        }
        guard
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            last_error: inner.last_error.clone(),
            retry_after: (inner.state == CircuitState::Open).then(|| inner.remaining_cooldown()),
        }
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// Only errors for which [`AppError::should_trip_circuit`] holds count
    /// as failures.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        {
            let inner = self.lock();
            if inner.state == CircuitState::Open {
                return Err(AppError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after_secs: inner.remaining_cooldown().as_secs().max(1),
                });
            }
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) => {}
        }
        result
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.success_threshold {
                    tracing::info!(circuit = %self.name, "Circuit breaker closed");
                    self.close(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock();
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failures,
                        error = %error,
                        "Circuit breaker opened"
                    );
                    self.open(&mut inner, error.is_rate_limit());
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(circuit = %self.name, error = %error, "Half-open trial failed, circuit re-opened");
                self.open(&mut inner, error.is_rate_limit());
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        self.close(&mut inner);
    }

    fn open(&self, inner: &mut BreakerState, rate_limited: bool) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_successes = 0;
        if rate_limited {
            let grown = inner
                .cooldown
                .mul_f32(self.config.rate_limit_multiplier.max(1.0));
            inner.cooldown = grown.min(self.config.max_cooldown);
            tracing::info!(
                circuit = %self.name,
                cooldown_secs = inner.cooldown.as_secs(),
                "Rate limited, cooldown extended"
            );
        }
    }

    fn close(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.trial_successes = 0;
        inner.opened_at = None;
        inner.last_error = None;
        inner.cooldown = self.config.cooldown;
    }
}
