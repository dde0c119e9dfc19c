use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation::CorrelationId;
use crate::domain::capability::CapabilityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProgress {
    pub calls: u32,
    pub status: CapabilityStatus,
    pub last_error: Option<String>,
}

/// Everything the routing loop has learned about one conversation.
///
/// Owned by a single request at a time; the runtime checkpoints it between turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    correlation_id: CorrelationId,
    #[serde(default)]
    progress: BTreeMap<CapabilityId, CapabilityProgress>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(default)]
    pub degraded_mode: bool,
    #[serde(default)]
    pub missing_data: Vec<String>,
}

impl ConversationState {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            messages: Vec::new(),
            correlation_id,
            progress: BTreeMap::new(),
            data: BTreeMap::new(),
            recovery_attempts: 0,
            needs_clarification: false,
            clarification_question: None,
            degraded_mode: false,
            missing_data: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Starts a new request on a restored conversation. Accumulated data is kept;
    /// per-request failure bookkeeping is cleared so failed lookups get another try.
    pub fn begin_request(&mut self, correlation_id: CorrelationId) {
        self.correlation_id = correlation_id;
        self.recovery_attempts = 0;
        self.needs_clarification = false;
        self.clarification_question = None;
        self.degraded_mode = false;
        self.missing_data.clear();
        for progress in self.progress.values_mut() {
            if progress.status != CapabilityStatus::Success {
                progress.status = CapabilityStatus::Pending;
            }
        }
    }

    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.push_message(MessageRole::User, content);
    }

    pub fn push_assistant_message(&mut self, content: impl Into<String>) {
        self.push_message(MessageRole::Assistant, content);
    }

    fn push_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(Message { role, content: content.into(), timestamp: Utc::now() });
    }

    pub fn status(&self, capability_id: &CapabilityId) -> CapabilityStatus {
        self.progress.get(capability_id).map(|progress| progress.status).unwrap_or_default()
    }

    pub fn call_count(&self, capability_id: &CapabilityId) -> u32 {
        self.progress.get(capability_id).map(|progress| progress.calls).unwrap_or(0)
    }

    pub fn last_error(&self, capability_id: &CapabilityId) -> Option<&str> {
        self.progress.get(capability_id).and_then(|progress| progress.last_error.as_deref())
    }

    pub fn progress(&self) -> &BTreeMap<CapabilityId, CapabilityProgress> {
        &self.progress
    }

    /// A key counts as populated only when it holds a non-null value.
    pub fn has_data(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(|value| !value.is_null())
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|value| !value.is_null())
    }

    pub fn all_data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn is_missing(&self, key: &str) -> bool {
        self.missing_data.iter().any(|missing| missing == key)
    }

    pub fn mark_running(&mut self, capability_id: &CapabilityId) {
        let progress = self.progress.entry(capability_id.clone()).or_default();
        progress.calls += 1;
        progress.status = CapabilityStatus::Running;
    }

    pub fn record_success(&mut self, capability_id: &CapabilityId, key: &str, value: Value) {
        let progress = self.progress.entry(capability_id.clone()).or_default();
        progress.status = CapabilityStatus::Success;
        progress.last_error = None;
        self.missing_data.retain(|missing| missing != key);
        self.data.insert(key.to_string(), value);
    }

    pub fn record_failure(&mut self, capability_id: &CapabilityId, error: impl Into<String>) {
        let progress = self.progress.entry(capability_id.clone()).or_default();
        progress.status = CapabilityStatus::Error;
        progress.last_error = Some(error.into());
    }

    /// Records a capability that could not deliver its data. The request keeps
    /// going with partial state instead of aborting.
    pub fn mark_degraded(
        &mut self,
        capability_id: &CapabilityId,
        key: &str,
        error: impl Into<String>,
    ) {
        self.record_failure(capability_id, error);
        self.degraded_mode = true;
        self.recovery_attempts += 1;
        if !self.is_missing(key) {
            self.missing_data.push(key.to_string());
        }
    }

    pub fn request_clarification(&mut self, question: impl Into<String>) {
        self.needs_clarification = true;
        self.clarification_question = Some(question.into());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{CapabilityStatus, ConversationState};
    use crate::correlation::CorrelationId;
    use crate::domain::capability::CapabilityId;

    fn state() -> ConversationState {
        ConversationState::new(CorrelationId::inherit_or_generate(Some("req-state")))
    }

    #[test]
    fn null_values_do_not_count_as_populated() {
        let mut state = state();
        let route = CapabilityId::new("route_agent");

        state.record_success(&route, "route", Value::Null);
        assert!(!state.has_data("route"));

        state.record_success(&route, "route", json!({ "distance_nm": 8288 }));
        assert!(state.has_data("route"));
        assert_eq!(state.status(&route), CapabilityStatus::Success);
    }

    #[test]
    fn degradation_tracks_missing_key_once_and_counts_recovery() {
        let mut state = state();
        let weather = CapabilityId::new("weather_agent");

        state.mark_running(&weather);
        state.mark_degraded(&weather, "weather", "circuit open");
        state.mark_degraded(&weather, "weather", "circuit open");

        assert!(state.degraded_mode);
        assert_eq!(state.missing_data, vec!["weather".to_string()]);
        assert_eq!(state.recovery_attempts, 2);
        assert_eq!(state.status(&weather), CapabilityStatus::Error);
        assert_eq!(state.last_error(&weather), Some("circuit open"));
        assert_eq!(state.call_count(&weather), 1);
    }

    #[test]
    fn begin_request_keeps_data_and_clears_request_bookkeeping() {
        let mut state = state();
        let route = CapabilityId::new("route_agent");
        let weather = CapabilityId::new("weather_agent");
        state.record_success(&route, "route", json!({ "distance_nm": 8288 }));
        state.mark_degraded(&weather, "weather", "timeout");
        state.request_clarification("which port?");

        state.begin_request(CorrelationId::inherit_or_generate(Some("req-next")));

        assert_eq!(state.correlation_id().as_str(), "req-next");
        assert!(state.has_data("route"));
        assert!(!state.degraded_mode);
        assert!(state.missing_data.is_empty());
        assert_eq!(state.recovery_attempts, 0);
        assert!(!state.needs_clarification);
        assert_eq!(state.status(&weather), CapabilityStatus::Pending);
        assert_eq!(state.status(&route), CapabilityStatus::Success);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut state = state();
        state.push_user_message("Find cheapest bunker from Singapore to Rotterdam");
        state.record_success(&CapabilityId::new("route_agent"), "route", json!({ "legs": 1 }));

        let encoded = serde_json::to_string(&state).expect("encode");
        let decoded: ConversationState = serde_json::from_str(&encoded).expect("decode");

        assert_eq!(decoded, state);
    }
}
