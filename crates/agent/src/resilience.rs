//! Timed, retried, breaker-guarded tool calls.
//!
//! Every attempt feeds the circuit breaker and the tool health registry before
//! the call future resolves, so callers that drop a result still leave the
//! bookkeeping accurate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use helmsman_core::config::ResilienceConfig;
use helmsman_core::correlation::CorrelationId;
use helmsman_core::errors::{ToolCallError, ToolError};
use helmsman_core::events::{EventCategory, EventOutcome, EventSink, RoutingEvent};
use helmsman_core::registry::ToolHealthRegistry;
use helmsman_core::resilience::{CircuitBreakerRegistry, RetryPolicy};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::tools::ToolExecutor;

pub struct ResilienceLayer {
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<ToolHealthRegistry>,
    retry: RetryPolicy,
    call_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl ResilienceLayer {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        health: Arc<ToolHealthRegistry>,
        retry: RetryPolicy,
        call_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { breakers, health, retry, call_timeout, events }
    }

    pub fn from_config(
        config: &ResilienceConfig,
        health: Arc<ToolHealthRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::new(config.breaker_config())),
            health,
            config.retry_policy(),
            config.call_timeout(),
            events,
        )
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn call(
        &self,
        executor: &dyn ToolExecutor,
        tool_id: &str,
        input: Value,
        correlation_id: &CorrelationId,
    ) -> Result<Value, ToolCallError> {
        let mut attempts = 0_u32;

        loop {
            if let Err(open) = self.breakers.acquire(tool_id) {
                warn!(
                    event_name = "resilience.circuit_open",
                    correlation_id = %correlation_id,
                    tool_id,
                    retry_after_ms = open.retry_after_ms,
                    attempts,
                    "call rejected by open circuit"
                );
                self.events.emit(
                    self.event(correlation_id, "resilience.circuit_open", EventOutcome::Rejected, tool_id)
                        .with_metadata("retry_after_ms", open.retry_after_ms),
                );
                return Err(ToolCallError::CircuitOpen {
                    tool_id: open.tool_id,
                    retry_after_ms: open.retry_after_ms,
                });
            }

            attempts += 1;
            let guard = AttemptGuard::new(&self.breakers, &self.health, tool_id);
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.call_timeout, executor.execute(tool_id, input.clone()))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ToolError::timeout(self.call_timeout)),
                };
            let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

            match outcome {
                Ok(value) => {
                    guard.finish(true, true, latency_ms);
                    if attempts > 1 {
                        info!(
                            event_name = "resilience.recovered",
                            correlation_id = %correlation_id,
                            tool_id,
                            attempts,
                            "tool call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(ToolError::Permanent(message)) => {
                    // the dependency answered, so the circuit treats it as alive
                    guard.finish(true, false, latency_ms);
                    warn!(
                        event_name = "resilience.permanent_failure",
                        correlation_id = %correlation_id,
                        tool_id,
                        error = %message,
                        "tool rejected the call"
                    );
                    self.events.emit(
                        self.event(
                            correlation_id,
                            "resilience.permanent_failure",
                            EventOutcome::Failed,
                            tool_id,
                        )
                        .with_metadata("error", &message),
                    );
                    return Err(ToolCallError::Permanent { tool_id: tool_id.to_string(), message });
                }
                Err(ToolError::Transient(message)) => {
                    guard.finish(false, false, latency_ms);
                    if attempts >= self.retry.max_attempts() {
                        warn!(
                            event_name = "resilience.retries_exhausted",
                            correlation_id = %correlation_id,
                            tool_id,
                            attempts,
                            error = %message,
                            "giving up on tool"
                        );
                        self.events.emit(
                            self.event(
                                correlation_id,
                                "resilience.retries_exhausted",
                                EventOutcome::Failed,
                                tool_id,
                            )
                            .with_metadata("attempts", attempts)
                            .with_metadata("error", &message),
                        );
                        return Err(ToolCallError::RetriesExhausted {
                            tool_id: tool_id.to_string(),
                            attempts,
                            last_error: message,
                        });
                    }

                    let delay = self.retry.backoff(attempts - 1);
                    debug!(
                        event_name = "resilience.retry_scheduled",
                        correlation_id = %correlation_id,
                        tool_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn event(
        &self,
        correlation_id: &CorrelationId,
        event_type: &str,
        outcome: EventOutcome,
        tool_id: &str,
    ) -> RoutingEvent {
        RoutingEvent::new(correlation_id, event_type, EventCategory::Resilience, outcome)
            .with_metadata("tool_id", tool_id)
    }
}

/// Releases the breaker slot if an attempt is abandoned mid-flight (the
/// caller dropped the future). An abandoned attempt counts as a failure.
struct AttemptGuard<'a> {
    breakers: &'a CircuitBreakerRegistry,
    health: &'a ToolHealthRegistry,
    tool_id: &'a str,
    finished: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(
        breakers: &'a CircuitBreakerRegistry,
        health: &'a ToolHealthRegistry,
        tool_id: &'a str,
    ) -> Self {
        Self { breakers, health, tool_id, finished: false }
    }

    fn finish(mut self, breaker_success: bool, call_success: bool, latency_ms: f64) {
        self.finished = true;
        if breaker_success {
            self.breakers.record_success(self.tool_id);
        } else {
            self.breakers.record_failure(self.tool_id);
        }
        record_health(self.health, self.tool_id, call_success, latency_ms);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breakers.record_failure(self.tool_id);
            record_health(self.health, self.tool_id, false, 0.0);
        }
    }
}

fn record_health(health: &ToolHealthRegistry, tool_id: &str, success: bool, latency_ms: f64) {
    if let Err(error) = health.record_call(tool_id, success, latency_ms) {
        debug!(
            event_name = "resilience.health_untracked",
            tool_id,
            error = %error,
            "tool has no health record"
        );
    }
}
