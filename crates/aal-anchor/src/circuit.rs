use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are short-circuited until the reset timeout elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Outcome of asking the breaker for permission to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed: call with the normal retry budget.
    Allowed,
    /// Circuit half-open: exactly one call, no retries.
    Trial,
    /// Circuit open (or a trial is already in flight): do not call.
    Rejected,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Per-backend failure isolation.
///
/// `Closed` → `Open` after `failure_threshold` consecutive failures.
/// `Open` → `HalfOpen` once `reset_timeout` has elapsed since opening, at
/// which point a single trial is admitted. The trial's outcome closes or
/// re-opens the circuit.
///
/// All time-dependent methods take the current instant explicitly.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    /// Ask to make a call at `now`. A `Trial` admission must be followed by
    /// exactly one `record_success` or `record_failure`.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if self.reset_deadline().is_some_and(|deadline| now >= deadline) {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Rejected
                } else {
                    self.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        match self.state {
            CircuitState::HalfOpen => self.trip(now),
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.trip(now)
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Give back a trial whose call never finished (its task was aborted).
    /// The circuit stays half-open and the next caller gets the trial.
    pub fn abandon_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    /// Stored state. An `Open` circuit whose timeout has elapsed still
    /// reports `Open` until the next [`CircuitBreaker::try_acquire`].
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// When an open circuit becomes eligible for a trial.
    pub fn reset_deadline(&self) -> Option<Instant> {
        match self.state {
            CircuitState::Open => self.opened_at.map(|at| at + self.reset_timeout),
            _ => None,
        }
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            retry_after_ms: self
                .reset_deadline()
                .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Serializable view of a breaker for health reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds until an open circuit admits a trial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}
