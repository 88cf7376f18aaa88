// crates/molt-resilience/src/breaker.rs
//
// Circuit breaker state machine.
//
//   Closed --(N consecutive failures)--> Open
//   Open --(open_duration elapsed)--> HalfOpen
//   HalfOpen --success--> Closed
//   HalfOpen --failure--> Open

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Count-based circuit breaker for one dependency path.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            open_duration,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting `Open` to `HalfOpen` once the open window elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a call may be attempted now.
    pub fn allow(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    /// Record a successful call. Resets to `Closed` from any state.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(dependency = %self.name, "circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call.
    ///
    /// Returns `true` when this failure moved the breaker into `Open`.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                dependency = %self.name,
                failures = inner.consecutive_failures,
                open_secs = self.open_duration.as_secs_f64(),
                "circuit breaker opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
        trip
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.open_duration)
                .unwrap_or(true);
            if elapsed {
                tracing::debug!(dependency = %self.name, "circuit breaker half-open");
                inner.state = CircuitState::HalfOpen;
            }
        }
    }
}
