//! Request driver: classify once, then alternate supervisor decisions and
//! capability execution until the supervisor finalizes or asks for
//! clarification.

use std::sync::Arc;

use helmsman_core::config::AppConfig;
use helmsman_core::correlation::CorrelationId;
use helmsman_core::domain::capability::{CapabilityDescriptor, CapabilityId};
use helmsman_core::domain::classification::IntentClassification;
use helmsman_core::domain::reasoning::{ReasoningAction, ReasoningTrace, TraceError};
use helmsman_core::domain::state::ConversationState;
use helmsman_core::errors::SupervisorError;
use helmsman_core::events::{EventCategory, EventOutcome, EventSink, RoutingEvent};
use helmsman_core::registry::Registries;
use helmsman_core::supervisor::{
    ReasoningSupervisor, RoutingDecision, RoutingInput, SupervisorLimits,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::classifier::{ClassifyOptions, IntentClassifier};
use crate::resilience::ResilienceLayer;
use crate::tools::ToolExecutor;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("reasoning trace rejected a supervisor step: {0}")]
    Trace(#[from] TraceError),
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub decision: RoutingDecision,
    pub trace: ReasoningTrace,
    pub state: ConversationState,
    pub classification: Option<IntentClassification>,
}

impl TurnOutcome {
    pub fn reply(&self) -> Option<&str> {
        self.state.messages.last().map(|message| message.content.as_str())
    }
}

pub struct AgentRuntime {
    supervisor: ReasoningSupervisor,
    classifier: Option<IntentClassifier>,
    resilience: ResilienceLayer,
    executor: Arc<dyn ToolExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
}

impl AgentRuntime {
    pub fn new(
        supervisor: ReasoningSupervisor,
        resilience: ResilienceLayer,
        executor: Arc<dyn ToolExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { supervisor, classifier: None, resilience, executor, checkpoints, events }
    }

    /// Supervisor limits from `routing` and resilience settings from
    /// `resilience`; attach a classifier separately with [`Self::with_classifier`].
    pub fn from_config(
        config: &AppConfig,
        registries: &Registries,
        executor: Arc<dyn ToolExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let supervisor = ReasoningSupervisor::new(
            Arc::clone(&registries.capabilities),
            SupervisorLimits::from(&config.routing),
        );
        let resilience = ResilienceLayer::from_config(
            &config.resilience,
            Arc::clone(&registries.tools),
            Arc::clone(&events),
        );
        Self::new(supervisor, resilience, executor, checkpoints, events)
    }

    /// Accepts the `Option` from [`IntentClassifier::from_config`]; `None`
    /// keeps keyword-only routing.
    pub fn with_classifier(mut self, classifier: impl Into<Option<IntentClassifier>>) -> Self {
        self.classifier = classifier.into();
        self
    }

    pub fn resilience(&self) -> &ResilienceLayer {
        &self.resilience
    }

    /// Runs one user turn. Tool and classifier failures end up in the returned
    /// state; only supervisor infrastructure and checkpoint errors surface here.
    pub async fn handle_turn(
        &self,
        conversation_id: &str,
        query: &str,
        correlation: Option<&str>,
    ) -> Result<TurnOutcome, RuntimeError> {
        let correlation_id = CorrelationId::inherit_or_generate(correlation);
        let mut state = match self.checkpoints.load(conversation_id).await? {
            Some(mut restored) => {
                restored.begin_request(correlation_id.clone());
                restored
            }
            None => ConversationState::new(correlation_id.clone()),
        };
        state.push_user_message(query);

        info!(
            event_name = "runtime.turn.start",
            correlation_id = %correlation_id,
            conversation_id,
            "handling turn"
        );

        let classification = match &self.classifier {
            Some(classifier) => {
                classifier.classify(query, &correlation_id, ClassifyOptions::default()).await
            }
            None => None,
        };

        let mut trace = ReasoningTrace::new(self.supervisor.limits().max_reasoning_steps);
        let decision = loop {
            let decision = self.supervisor.decide(RoutingInput {
                query,
                state: &state,
                steps: trace.steps(),
                classification: classification.as_ref(),
            })?;
            if let Some(step) = decision.step.clone() {
                trace.push(step)?;
            }

            match (decision.action, decision.next_capability.clone()) {
                (ReasoningAction::CallAgent, Some(capability_id)) => {
                    self.emit(
                        &correlation_id,
                        "routing.capability_selected",
                        EventOutcome::Success,
                        &capability_id,
                    );
                    self.run_capability(&capability_id, query, classification.as_ref(), &mut state)
                        .await;
                }
                _ => break decision,
            }
        };

        decision.apply_to(&mut state);
        state.push_assistant_message(summarize(&decision, &state));
        self.checkpoints.save(conversation_id, &state).await?;

        info!(
            event_name = "runtime.turn.complete",
            correlation_id = %correlation_id,
            conversation_id,
            action = decision.action.as_str(),
            steps = trace.len(),
            degraded = state.degraded_mode,
            "turn finished"
        );
        let outcome = if state.degraded_mode || decision.needs_clarification {
            EventOutcome::Degraded
        } else {
            EventOutcome::Success
        };
        self.events.emit(
            RoutingEvent::new(
                &correlation_id,
                "routing.turn_completed",
                EventCategory::Routing,
                outcome,
            )
            .with_metadata("action", decision.action.as_str())
            .with_metadata("steps", trace.len())
            .with_metadata("missing", state.missing_data.join(",")),
        );

        Ok(TurnOutcome { decision, trace, state, classification })
    }

    async fn run_capability(
        &self,
        capability_id: &CapabilityId,
        query: &str,
        classification: Option<&IntentClassification>,
        state: &mut ConversationState,
    ) {
        let correlation_id = state.correlation_id().clone();
        let Some(descriptor) = self.supervisor.capabilities().get_by_id(capability_id.as_str())
        else {
            state.mark_degraded(capability_id, capability_id.as_str(), "capability not registered");
            return;
        };
        let descriptor = descriptor.clone();
        let key = descriptor.output_key().to_string();
        state.mark_running(capability_id);

        let input = self.capability_input(&descriptor, query, classification, state);
        let mut outputs = Map::new();

        for tool_id in &descriptor.tools.required {
            let result = self
                .resilience
                .call(self.executor.as_ref(), tool_id.as_str(), input.clone(), &correlation_id)
                .await;
            let failure = match result {
                Ok(Value::Null) => format!("tool `{tool_id}` returned no data"),
                Ok(value) => {
                    outputs.insert(tool_id.as_str().to_string(), value);
                    continue;
                }
                Err(error) => error.to_string(),
            };
            self.degrade(state, capability_id, &key, failure);
            return;
        }

        for tool_id in &descriptor.tools.optional {
            if descriptor.tools.required.contains(tool_id) {
                continue;
            }
            match self
                .resilience
                .call(self.executor.as_ref(), tool_id.as_str(), input.clone(), &correlation_id)
                .await
            {
                Ok(Value::Null) => {}
                Ok(value) => {
                    outputs.insert(tool_id.as_str().to_string(), value);
                }
                Err(error) => debug!(
                    event_name = "runtime.optional_tool_skipped",
                    correlation_id = %correlation_id,
                    capability_id = %capability_id,
                    tool_id = %tool_id,
                    error = %error,
                    "optional tool failed"
                ),
            }
        }

        if outputs.is_empty() {
            self.degrade(state, capability_id, &key, "capability produced no data".to_string());
            return;
        }

        state.record_success(capability_id, &key, Value::Object(outputs));
        info!(
            event_name = "runtime.capability.completed",
            correlation_id = %correlation_id,
            capability_id = %capability_id,
            output_key = %key,
            "capability data merged"
        );
        self.emit(&correlation_id, "routing.capability_completed", EventOutcome::Success, capability_id);
    }

    /// The query, classifier parameters and every upstream capability's data.
    fn capability_input(
        &self,
        descriptor: &CapabilityDescriptor,
        query: &str,
        classification: Option<&IntentClassification>,
        state: &ConversationState,
    ) -> Value {
        let mut context = Map::new();
        for upstream in &descriptor.dependencies.upstream {
            let key = self
                .supervisor
                .capabilities()
                .get_by_id(upstream.as_str())
                .map(|upstream| upstream.output_key().to_string())
                .unwrap_or_else(|| upstream.as_str().to_string());
            if let Some(value) = state.data(&key) {
                context.insert(key, value.clone());
            }
        }
        let params = classification
            .filter(|classification| classification.agent_id == descriptor.id)
            .map(|classification| json!(classification.extracted_params))
            .unwrap_or_else(|| json!({}));

        json!({ "query": query, "params": params, "context": Value::Object(context) })
    }

    fn degrade(
        &self,
        state: &mut ConversationState,
        capability_id: &CapabilityId,
        key: &str,
        reason: String,
    ) {
        let correlation_id = state.correlation_id().clone();
        warn!(
            event_name = "runtime.capability.degraded",
            correlation_id = %correlation_id,
            capability_id = %capability_id,
            reason = %reason,
            "continuing without capability data"
        );
        self.events.emit(
            RoutingEvent::new(
                &correlation_id,
                "routing.capability_degraded",
                EventCategory::Routing,
                EventOutcome::Degraded,
            )
            .with_metadata("capability_id", capability_id)
            .with_metadata("reason", &reason),
        );
        state.mark_degraded(capability_id, key, reason);
    }

    fn emit(
        &self,
        correlation_id: &CorrelationId,
        event_type: &str,
        outcome: EventOutcome,
        capability_id: &CapabilityId,
    ) {
        self.events.emit(
            RoutingEvent::new(correlation_id, event_type, EventCategory::Routing, outcome)
                .with_metadata("capability_id", capability_id),
        );
    }
}

fn summarize(decision: &RoutingDecision, state: &ConversationState) -> String {
    if let (true, Some(question)) = (decision.needs_clarification, &decision.clarification_question)
    {
        if state.all_data().is_empty() {
            return question.clone();
        }
    }

    let collected = state
        .all_data()
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>();
    let mut summary = if collected.is_empty() {
        "No data could be collected for this request.".to_string()
    } else {
        format!("Collected: {}.", collected.join(", "))
    };
    if !state.missing_data.is_empty() {
        summary.push_str(&format!(" Unavailable: {}.", state.missing_data.join(", ")));
    }
    if let (true, Some(question)) = (decision.needs_clarification, &decision.clarification_question)
    {
        summary.push(' ');
        summary.push_str(question);
    }
    summary
}
