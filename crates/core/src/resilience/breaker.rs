//! Per-tool circuit breakers.
//!
//! CLOSED counts consecutive failures and opens at the threshold. OPEN rejects
//! calls until the cooldown elapses, then admits exactly one trial call in
//! HALF_OPEN. The trial's outcome either closes the circuit or reopens it with
//! a fresh cooldown.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

/// Pull-style snapshot of one breaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub tool_id: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub tool_id: String,
    pub retry_after_ms: u64,
}

/// How a call was let through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// The single trial call allowed while HALF_OPEN.
    Trial,
}

#[derive(Debug, Default)]
struct Breaker {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    opened_instant: Option<Instant>,
    trial_in_flight: bool,
}

impl Breaker {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Utc::now());
        self.opened_instant = Some(Instant::now());
        self.trial_in_flight = false;
    }

    fn remaining_cooldown(&self, cooldown: Duration) -> Duration {
        self.opened_instant
            .map(|opened| cooldown.saturating_sub(opened.elapsed()))
            .unwrap_or_default()
    }
}

/// One breaker per tool id, created lazily. Each state transition happens
/// under a single lock acquisition.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Breaker>> {
        match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Asks permission to call `tool_id`. Rejections carry the time left
    /// before a trial could be admitted.
    pub fn acquire(&self, tool_id: &str) -> Result<Admission, CircuitOpenError> {
        let mut breakers = self.lock();
        let breaker = breakers.entry(tool_id.to_string()).or_default();

        match breaker.state {
            CircuitState::Closed => Ok(Admission::Closed),
            CircuitState::Open => {
                let remaining = breaker.remaining_cooldown(self.config.cooldown);
                if remaining.is_zero() {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.trial_in_flight = true;
                    info!(
                        event_name = "resilience.breaker.half_open",
                        tool_id,
                        "cooldown elapsed; admitting trial call"
                    );
                    Ok(Admission::Trial)
                } else {
                    Err(CircuitOpenError {
                        tool_id: tool_id.to_string(),
                        retry_after_ms: remaining.as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen if breaker.trial_in_flight => {
                Err(CircuitOpenError { tool_id: tool_id.to_string(), retry_after_ms: 0 })
            }
            CircuitState::HalfOpen => {
                breaker.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    pub fn record_success(&self, tool_id: &str) {
        let mut breakers = self.lock();
        let breaker = breakers.entry(tool_id.to_string()).or_default();

        match breaker.state {
            CircuitState::Closed => breaker.failures = 0,
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Closed;
                breaker.failures = 0;
                breaker.trial_in_flight = false;
                breaker.opened_at = None;
                breaker.opened_instant = None;
                info!(event_name = "resilience.breaker.closed", tool_id, "trial succeeded");
            }
            // a call admitted before the circuit opened; the open decision stands
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, tool_id: &str) {
        let mut breakers = self.lock();
        let breaker = breakers.entry(tool_id.to_string()).or_default();
        breaker.failures = breaker.failures.saturating_add(1);
        breaker.last_failure_at = Some(Utc::now());

        match breaker.state {
            CircuitState::Closed if breaker.failures >= self.config.failure_threshold => {
                breaker.open();
                warn!(
                    event_name = "resilience.breaker.opened",
                    tool_id,
                    failures = breaker.failures,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "failure threshold reached"
                );
            }
            CircuitState::HalfOpen => {
                breaker.open();
                warn!(event_name = "resilience.breaker.reopened", tool_id, "trial call failed");
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn state(&self, tool_id: &str) -> CircuitState {
        self.lock().get(tool_id).map(|breaker| breaker.state).unwrap_or_default()
    }

    pub fn status(&self) -> BTreeMap<String, CircuitBreakerStatus> {
        self.lock()
            .iter()
            .map(|(tool_id, breaker)| {
                (
                    tool_id.clone(),
                    CircuitBreakerStatus {
                        tool_id: tool_id.clone(),
                        state: breaker.state,
                        failures: breaker.failures,
                        last_failure_at: breaker.last_failure_at,
                        opened_at: breaker.opened_at,
                    },
                )
            })
            .collect()
    }

    pub fn reset(&self, tool_id: &str) {
        if self.lock().remove(tool_id).is_some() {
            info!(event_name = "resilience.breaker.reset", tool_id, "breaker reset");
        }
    }

    pub fn reset_all(&self) {
        self.lock().clear();
        info!(event_name = "resilience.breaker.reset_all", "all breakers reset");
    }
}
