//! Circuit breaker for outbound dependencies.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - HalfOpen: cool-down elapsed, a limited number of trial calls may pass
//!
//! # Transitions
//! ```text
//! Closed   → Open:     samples >= minimum_throughput && failure rate >= failure_ratio
//! Open     → HalfOpen: break_duration elapsed (evaluated on next access)
//! HalfOpen → Closed:   trial call succeeds (window is cleared)
//! HalfOpen → Open:     trial call fails or is abandoned
//! ```
//!
//! A trial [`Permit`] dropped without an outcome (its caller was cancelled
//! or timed out) counts as a failed trial, so the half-open slot is always
//! given back.
//!
//! All transitions happen under one short mutex, so when many callers observe
//! the same breach only the first one performs the transition.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Tuning for a breaker and the calls it guards.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0..=1.0) at which the breaker opens.
    pub failure_ratio: f64,
    /// Rolling window the failure rate is computed over.
    pub sampling_duration: Duration,
    /// Minimum samples in the window before the breaker may open.
    pub minimum_throughput: usize,
    /// How long the breaker stays open before allowing trial calls.
    pub break_duration: Duration,
    /// Deadline for a single guarded call.
    pub call_timeout: Duration,
    /// Extra attempts per invocation after a failed call.
    pub max_retries: u32,
    /// Pause between attempts of one invocation.
    pub retry_delay: Duration,
    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_duration: Duration::from_secs(60),
            minimum_throughput: 10,
            break_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            half_open_max_calls: 1,
        }
    }
}

/// Admission ticket for one guarded call.
///
/// Hand it back through [`CircuitBreaker::on_success`] or
/// [`CircuitBreaker::on_failure`]. Dropping a trial permit re-opens the circuit.
#[must_use = "a permit must be settled with on_success or on_failure"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

/// Breaker status exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub samples: usize,
    pub failure_rate: f64,
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    outcomes: VecDeque<(Instant, bool)>,
    trials_in_flight: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: RwLock<CircuitBreakerConfig>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: RwLock::new(config),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                outcomes: VecDeque::new(),
                trials_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the tuning. Current state and samples are kept.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut current = self.config.write().unwrap_or_else(|e| e.into_inner());
        if *current != config {
            info!(breaker = %self.name, ?config, "circuit breaker reconfigured");
            *current = config;
        }
    }

    /// Current state, applying the cool-down transition if it is due.
    pub fn state(&self) -> CircuitState {
        let config = self.config();
        let mut inner = self.lock();
        self.advance_cooldown(&mut inner, &config);
        inner.state
    }

    pub fn status(&self) -> CircuitStatus {
        let config = self.config();
        let mut inner = self.lock();
        self.advance_cooldown(&mut inner, &config);
        trim(&mut inner.outcomes, config.sampling_duration);
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            samples: inner.outcomes.len(),
            failure_rate: failure_rate(&inner.outcomes),
        }
    }

    /// Ask to make a call. `None` means fail fast.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let config = self.config();
        let mut inner = self.lock();
        self.advance_cooldown(&mut inner, &config);

        match inner.state {
            CircuitState::Closed => Some(self.permit(false)),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < config.half_open_max_calls.max(1) {
                    inner.trials_in_flight += 1;
                    Some(self.permit(true))
                } else {
                    None
                }
            }
        }
    }

    pub fn on_success(&self, mut permit: Permit<'_>) {
        permit.settled = true;
        let config = self.config();
        let mut inner = self.lock();

        if permit.trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.outcomes.clear();
                info!(breaker = %self.name, "circuit closed after successful trial call");
            }
            return;
        }

        if inner.state == CircuitState::Closed {
            let now = Instant::now();
            inner.outcomes.push_back((now, true));
            trim(&mut inner.outcomes, config.sampling_duration);
        }
    }

    pub fn on_failure(&self, mut permit: Permit<'_>) {
        permit.settled = true;
        let config = self.config();
        let mut inner = self.lock();

        if permit.trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }

        let now = Instant::now();
        inner.outcomes.push_back((now, false));
        trim(&mut inner.outcomes, config.sampling_duration);

        let samples = inner.outcomes.len();
        let rate = failure_rate(&inner.outcomes);
        if samples >= config.minimum_throughput && rate >= config.failure_ratio {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(
                breaker = %self.name,
                samples,
                failure_rate = rate,
                break_secs = config.break_duration.as_secs_f64(),
                "circuit opened"
            );
        }
    }

    fn permit(&self, trial: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(breaker = %self.name, "trial call abandoned, circuit re-opened");
        }
    }

    /// Force the breaker closed and forget recorded outcomes.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.outcomes.clear();
        inner.trials_in_flight = 0;
        info!(breaker = %self.name, "circuit breaker reset");
    }

    fn advance_cooldown(&self, inner: &mut BreakerState, config: &CircuitBreakerConfig) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .map_or(true, |opened| opened.elapsed() >= config.break_duration);
        if due {
            inner.state = CircuitState::HalfOpen;
            inner.trials_in_flight = 0;
            info!(breaker = %self.name, "circuit half-open, allowing trial calls");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn trim(outcomes: &mut VecDeque<(Instant, bool)>, window: Duration) {
    let now = Instant::now();
    while outcomes
        .front()
        .is_some_and(|(at, _)| now.duration_since(*at) > window)
    {
        outcomes.pop_front();
    }
}

fn failure_rate(outcomes: &VecDeque<(Instant, bool)>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failures = outcomes.iter().filter(|(_, ok)| !ok).count();
    failures as f64 / outcomes.len() as f64
}
