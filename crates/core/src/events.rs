use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::correlation::CorrelationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Classification,
    Routing,
    Resilience,
    Registry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    Degraded,
    Rejected,
    Failed,
}

/// Structured record of one routing-relevant outcome, keyed by correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub event_id: String,
    pub correlation_id: String,
    pub event_type: String,
    pub category: EventCategory,
    pub outcome: EventOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl RoutingEvent {
    pub fn new(
        correlation_id: &CorrelationId,
        event_type: impl Into<String>,
        category: EventCategory,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            event_type: event_type.into(),
            category,
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: RoutingEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<RoutingEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<RoutingEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<RoutingEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: RoutingEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards events to the tracing subscriber as one info line each.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RoutingEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = %metadata,
            "routing event"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::{
        EventCategory, EventOutcome, EventSink, InMemoryEventSink, RoutingEvent, TracingEventSink,
    };
    use crate::correlation::CorrelationId;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            let bytes = self.0.lock().map(|guard| guard.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut guard) = self.0.lock() {
                guard.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracing_sink_writes_one_line_with_event_fields() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let correlation_id = CorrelationId::inherit_or_generate(Some("req-trace"));

        tracing::subscriber::with_default(subscriber, || {
            TracingEventSink.emit(
                RoutingEvent::new(
                    &correlation_id,
                    "routing.dry_run",
                    EventCategory::Routing,
                    EventOutcome::Degraded,
                )
                .with_metadata("action", "ask_clarification"),
            );
        });

        let output = log.contents();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("event_name=routing.dry_run"));
        assert!(output.contains("correlation_id=req-trace"));
        assert!(output.contains("outcome=Degraded"));
        assert!(output.contains(r#"{"action":"ask_clarification"}"#));
    }

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryEventSink::default();
        let correlation_id = CorrelationId::inherit_or_generate(Some("req-123"));
        sink.emit(
            RoutingEvent::new(
                &correlation_id,
                "classification.cache_hit",
                EventCategory::Classification,
                EventOutcome::Success,
            )
            .with_metadata("agent_id", "weather_agent")
            .with_metadata("latency_ms", 3),
        );
        sink.emit(RoutingEvent::new(
            &correlation_id,
            "resilience.circuit_open",
            EventCategory::Resilience,
            EventOutcome::Rejected,
        ));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].metadata.get("latency_ms").map(String::as_str), Some("3"));
        assert_eq!(sink.events_of_type("resilience.circuit_open").len(), 1);
        assert_ne!(events[0].event_id, events[1].event_id);
    }
}
