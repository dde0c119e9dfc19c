//! Bounded routing supervisor.
//!
//! Each call to [`ReasoningSupervisor::decide`] looks at the conversation
//! state, the reasoning steps taken so far and the optional classifier
//! result, and returns exactly one decision: call the next capability,
//! finalize, or ask the user for clarification. The supervisor never
//! performs I/O; executing the decision is the runtime's job.

pub mod rules;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RoutingConfig;
use crate::domain::capability::CapabilityId;
use crate::domain::classification::IntentClassification;
use crate::domain::reasoning::{ReasoningAction, ReasoningStep};
use crate::domain::state::ConversationState;
use crate::errors::SupervisorError;
use crate::registry::capabilities::CapabilityRegistry;

pub use rules::{KeywordMatch, OrderingConstraint, RoutePlan};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SupervisorLimits {
    pub max_reasoning_steps: usize,
    pub max_recovery_attempts: u32,
    pub min_confidence: f64,
}

impl Default for SupervisorLimits {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for SupervisorLimits {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            max_reasoning_steps: config.max_reasoning_steps,
            max_recovery_attempts: config.max_recovery_attempts,
            min_confidence: config.min_confidence,
        }
    }
}

pub struct RoutingInput<'a> {
    pub query: &'a str,
    pub state: &'a ConversationState,
    pub steps: &'a [ReasoningStep],
    pub classification: Option<&'a IntentClassification>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    StepLimitReached,
    RecoveryExhausted,
    NextInChain,
    DataComplete,
    /// Finalized with some capabilities abandoned after failures.
    PartialData,
    NoCandidate,
    PlanningFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Classifier,
    KeywordRules,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: ReasoningAction,
    pub next_capability: Option<CapabilityId>,
    pub reason: DecisionReason,
    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    /// `None` only when the step budget is already spent.
    pub step: Option<ReasoningStep>,
    pub candidate_source: Option<CandidateSource>,
    pub plan: Option<RoutePlan>,
}

impl RoutingDecision {
    fn new(action: ReasoningAction, reason: DecisionReason) -> Self {
        Self {
            action,
            next_capability: None,
            reason,
            needs_clarification: false,
            clarification_question: None,
            step: None,
            candidate_source: None,
            plan: None,
        }
    }

    fn clarify(mut self, question: String) -> Self {
        self.needs_clarification = true;
        self.clarification_question = Some(question);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.action.is_terminal()
    }

    /// Copies the clarification request onto the conversation.
    pub fn apply_to(&self, state: &mut ConversationState) {
        if let (true, Some(question)) = (self.needs_clarification, &self.clarification_question) {
            state.request_clarification(question.clone());
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReasoningSupervisor {
    capabilities: Arc<CapabilityRegistry>,
    limits: SupervisorLimits,
}

impl ReasoningSupervisor {
    pub fn new(capabilities: Arc<CapabilityRegistry>, limits: SupervisorLimits) -> Self {
        Self { capabilities, limits }
    }

    pub fn limits(&self) -> SupervisorLimits {
        self.limits
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn decide(&self, input: RoutingInput<'_>) -> Result<RoutingDecision, SupervisorError> {
        self.check_input(&input)?;

        let correlation_id = input.state.correlation_id().as_str();
        let step_number = input.steps.len() as u32 + 1;

        if input.steps.len() >= self.limits.max_reasoning_steps {
            warn!(
                event_name = "supervisor.step_limit",
                correlation_id,
                steps = input.steps.len(),
                "reasoning step limit reached; finalizing"
            );
            return Ok(RoutingDecision::new(
                ReasoningAction::Finalize,
                DecisionReason::StepLimitReached,
            ));
        }

        if input.state.recovery_attempts >= self.limits.max_recovery_attempts {
            let question = recovery_question(&input.state.missing_data);
            let step = ReasoningStep::new(
                step_number,
                format!(
                    "Recovery budget spent after {} failed lookups; returning what I have.",
                    input.state.recovery_attempts
                ),
                ReasoningAction::Finalize,
            )
            .with_param("reason", "recovery_exhausted")
            .with_param("missing", input.state.missing_data.join(","));
            let mut decision =
                RoutingDecision::new(ReasoningAction::Finalize, DecisionReason::RecoveryExhausted)
                    .clarify(question);
            decision.step = Some(step);
            return Ok(self.logged(decision, correlation_id));
        }

        let (targets, source) = self.select_targets(&input);
        if targets.is_empty() {
            let question = self.capability_menu_question();
            let step = ReasoningStep::new(
                step_number,
                "No capability matches the request; asking the user to clarify.",
                ReasoningAction::AskClarification,
            )
            .with_param("question", question.clone());
            let mut decision = RoutingDecision::new(
                ReasoningAction::AskClarification,
                DecisionReason::NoCandidate,
            )
            .clarify(question);
            decision.step = Some(step);
            return Ok(self.logged(decision, correlation_id));
        }

        let plan = match rules::plan(&self.capabilities, &targets, input.state) {
            Ok(plan) => plan,
            Err(error) => {
                warn!(
                    event_name = "supervisor.planning_failed",
                    correlation_id,
                    error = %error,
                    "dependency planning failed; asking for clarification"
                );
                let question = self.capability_menu_question();
                let step = ReasoningStep::new(
                    step_number,
                    format!("Could not plan the capability order ({error})."),
                    ReasoningAction::AskClarification,
                )
                .with_param("question", question.clone());
                let mut decision = RoutingDecision::new(
                    ReasoningAction::AskClarification,
                    DecisionReason::PlanningFailed,
                )
                .clarify(question);
                decision.step = Some(step);
                decision.candidate_source = Some(source);
                return Ok(self.logged(decision, correlation_id));
            }
        };

        let target_list = join_ids(&targets);
        let mut decision = match plan.next.clone() {
            Some(next) => {
                let thought = if targets.contains(&next) {
                    format!("The request needs {next}; its inputs are available, calling it.")
                } else {
                    format!("{target_list} depends on {next}, which has no data yet; calling it first.")
                };
                let step = ReasoningStep::new(step_number, thought, ReasoningAction::CallAgent)
                    .with_param("agent_id", next.as_str())
                    .with_param("targets", target_list.clone());
                let mut decision =
                    RoutingDecision::new(ReasoningAction::CallAgent, DecisionReason::NextInChain);
                decision.next_capability = Some(next);
                decision.step = Some(step);
                decision
            }
            None => {
                let (thought, reason, reason_param) = if plan.abandoned.is_empty() {
                    (
                        format!("All data for {target_list} is in place; finalizing."),
                        DecisionReason::DataComplete,
                        "data_complete",
                    )
                } else {
                    (
                        format!(
                            "Gathered what is available for {target_list}; {} could not be retrieved.",
                            join_ids(&plan.abandoned)
                        ),
                        DecisionReason::PartialData,
                        "partial_data",
                    )
                };
                let step = ReasoningStep::new(step_number, thought, ReasoningAction::Finalize)
                    .with_param("reason", reason_param)
                    .with_param("abandoned", join_ids(&plan.abandoned));
                let mut decision = RoutingDecision::new(ReasoningAction::Finalize, reason);
                decision.step = Some(step);
                decision
            }
        };
        decision.candidate_source = Some(source);
        decision.plan = Some(plan);
        Ok(self.logged(decision, correlation_id))
    }

    fn check_input(&self, input: &RoutingInput<'_>) -> Result<(), SupervisorError> {
        if input.state.correlation_id().is_empty() {
            return Err(SupervisorError::InvalidState("correlation id is empty".to_string()));
        }
        for (index, step) in input.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.step_number != expected {
                return Err(SupervisorError::InvalidState(format!(
                    "step history out of order: expected step {expected}, found {}",
                    step.step_number
                )));
            }
        }
        if self.capabilities.is_empty() {
            return Err(SupervisorError::NoCapabilities);
        }
        Ok(())
    }

    /// The classifier's pick wins when it is registered, enabled and confident
    /// enough; otherwise every keyword match becomes a target.
    fn select_targets(&self, input: &RoutingInput<'_>) -> (Vec<CapabilityId>, CandidateSource) {
        if let Some(classification) = input.classification {
            if self.capabilities.is_enabled(classification.agent_id.as_str())
                && classification.meets(self.limits.min_confidence)
            {
                return (vec![classification.agent_id.clone()], CandidateSource::Classifier);
            }
            debug!(
                event_name = "supervisor.classification_ignored",
                correlation_id = input.state.correlation_id().as_str(),
                agent_id = %classification.agent_id,
                confidence = classification.confidence,
                "classifier result below threshold or not routable"
            );
        }

        let targets = rules::keyword_candidates(&self.capabilities, input.query)
            .into_iter()
            .map(|candidate| candidate.capability_id)
            .collect();
        (targets, CandidateSource::KeywordRules)
    }

    fn capability_menu_question(&self) -> String {
        let options = self
            .capabilities
            .get_enabled()
            .into_iter()
            .map(|descriptor| {
                if descriptor.description.trim().is_empty() {
                    descriptor.id.0.clone()
                } else {
                    descriptor.description.trim().to_string()
                }
            })
            .collect::<Vec<_>>();
        if options.is_empty() {
            return "Could you rephrase the request?".to_string();
        }
        format!("Could you clarify what you need? I can help with: {}.", options.join("; "))
    }

    fn logged(&self, decision: RoutingDecision, correlation_id: &str) -> RoutingDecision {
        debug!(
            event_name = "supervisor.decision",
            correlation_id,
            action = decision.action.as_str(),
            reason = ?decision.reason,
            next_capability = decision.next_capability.as_ref().map(CapabilityId::as_str),
            "routing decision"
        );
        decision
    }
}

fn recovery_question(missing: &[String]) -> String {
    if missing.is_empty() {
        return "Some lookups kept failing. Could you rephrase or narrow the request?".to_string();
    }
    format!(
        "I could not retrieve {}. Would you like a partial answer, or can you provide that information?",
        missing.join(", ")
    )
}

fn join_ids(ids: &[CapabilityId]) -> String {
    ids.iter().map(CapabilityId::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::json;

    use super::{
        CandidateSource, DecisionReason, ReasoningSupervisor, RoutingInput, SupervisorLimits,
    };
    use crate::correlation::CorrelationId;
    use crate::domain::capability::{CapabilityDescriptor, CapabilityId};
    use crate::domain::classification::IntentClassification;
    use crate::domain::reasoning::{ReasoningAction, ReasoningStep};
    use crate::domain::state::ConversationState;
    use crate::errors::SupervisorError;
    use crate::registry::capabilities::CapabilityRegistry;
    use crate::registry::tools::ToolHealthRegistry;

    fn registry() -> CapabilityRegistry {
        let tools = ToolHealthRegistry::new();
        let mut registry = CapabilityRegistry::new();
        for descriptor in [
            CapabilityDescriptor::new("route_agent")
                .with_description("voyage routes and distances")
                .with_keywords(["route", "distance", "voyage"])
                .with_output_key("route"),
            CapabilityDescriptor::new("weather_agent")
                .with_description("marine weather forecasts")
                .with_keywords(["weather", "forecast", "wind"])
                .with_output_key("weather"),
            CapabilityDescriptor::new("bunker_agent")
                .with_description("bunker fuel prices")
                .with_keywords(["bunker", "fuel", "cheapest"])
                .with_upstream(["route_agent"])
                .with_output_key("bunker"),
            CapabilityDescriptor::new("vessel_info_agent")
                .with_keywords(["vessel", "fleet"])
                .with_output_key("vessels"),
        ] {
            registry.register(descriptor, &tools).expect("fixture");
        }
        registry
    }

    fn supervisor() -> ReasoningSupervisor {
        ReasoningSupervisor::new(Arc::new(registry()), SupervisorLimits::default())
    }

    fn state() -> ConversationState {
        ConversationState::new(CorrelationId::inherit_or_generate(Some("req-supervisor")))
    }

    fn classification(agent_id: &str, confidence: f64) -> IntentClassification {
        IntentClassification {
            agent_id: CapabilityId::new(agent_id),
            intent: "test".to_string(),
            confidence,
            reasoning: String::new(),
            extracted_params: BTreeMap::new(),
            cache_hit: false,
            latency_ms: 0,
            cost_usd: 0.0,
            query_hash: "hash".to_string(),
        }
    }

    fn steps(count: u32) -> Vec<ReasoningStep> {
        (1..=count)
            .map(|number| ReasoningStep::new(number, "earlier", ReasoningAction::CallAgent))
            .collect()
    }

    #[test]
    fn weather_question_routes_to_weather_in_one_step() {
        let supervisor = supervisor();
        let state = state();

        let decision = supervisor
            .decide(RoutingInput {
                query: "What is the weather at Singapore port on January 22?",
                state: &state,
                steps: &[],
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.action, ReasoningAction::CallAgent);
        assert_eq!(decision.next_capability, Some(CapabilityId::new("weather_agent")));
        assert_eq!(decision.candidate_source, Some(CandidateSource::KeywordRules));
        assert_eq!(decision.step.as_ref().map(|step| step.step_number), Some(1));
    }

    #[test]
    fn bunker_question_calculates_route_first_then_skips_it() {
        let supervisor = supervisor();
        let mut state = state();
        let query = "Find cheapest bunker from Singapore to Rotterdam";

        let first = supervisor
            .decide(RoutingInput { query, state: &state, steps: &[], classification: None })
            .expect("first decision");
        assert_eq!(first.next_capability, Some(CapabilityId::new("route_agent")));
        assert_eq!(first.reason, DecisionReason::NextInChain);

        state.record_success(&CapabilityId::new("route_agent"), "route", json!({ "nm": 8288 }));
        let second = supervisor
            .decide(RoutingInput { query, state: &state, steps: &steps(1), classification: None })
            .expect("second decision");
        assert_eq!(second.next_capability, Some(CapabilityId::new("bunker_agent")));

        state.record_success(&CapabilityId::new("bunker_agent"), "bunker", json!({ "usd": 610 }));
        let third = supervisor
            .decide(RoutingInput { query, state: &state, steps: &steps(2), classification: None })
            .expect("third decision");
        assert_eq!(third.action, ReasoningAction::Finalize);
        assert_eq!(third.reason, DecisionReason::DataComplete);
        assert!(!third.needs_clarification);
    }

    #[test]
    fn confident_classifier_overrides_keywords() {
        let supervisor = supervisor();
        let state = state();
        let classified = classification("vessel_info_agent", 0.92);

        let decision = supervisor
            .decide(RoutingInput {
                query: "weather please",
                state: &state,
                steps: &[],
                classification: Some(&classified),
            })
            .expect("decision");

        assert_eq!(decision.next_capability, Some(CapabilityId::new("vessel_info_agent")));
        assert_eq!(decision.candidate_source, Some(CandidateSource::Classifier));
    }

    #[test]
    fn low_confidence_classifier_falls_back_to_keywords() {
        let supervisor = supervisor();
        let state = state();
        let classified = classification("vessel_info_agent", 0.2);

        let decision = supervisor
            .decide(RoutingInput {
                query: "wind forecast for tomorrow",
                state: &state,
                steps: &[],
                classification: Some(&classified),
            })
            .expect("decision");

        assert_eq!(decision.next_capability, Some(CapabilityId::new("weather_agent")));
        assert_eq!(decision.candidate_source, Some(CandidateSource::KeywordRules));
    }

    #[test]
    fn step_limit_forces_finalize() {
        let supervisor = supervisor();
        let state = state();
        let history = steps(10);

        let decision = supervisor
            .decide(RoutingInput {
                query: "weather",
                state: &state,
                steps: &history,
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.action, ReasoningAction::Finalize);
        assert_eq!(decision.reason, DecisionReason::StepLimitReached);
        assert!(decision.step.is_none());
    }

    #[test]
    fn recovery_exhaustion_finalizes_with_clarification() {
        let supervisor = supervisor();
        let mut state = state();
        for _ in 0..3 {
            state.mark_degraded(&CapabilityId::new("weather_agent"), "weather", "timeout");
        }

        let mut decision = supervisor
            .decide(RoutingInput {
                query: "weather",
                state: &state,
                steps: &steps(3),
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.action, ReasoningAction::Finalize);
        assert_eq!(decision.reason, DecisionReason::RecoveryExhausted);
        assert!(decision.needs_clarification);
        let question = decision.clarification_question.take().expect("question");
        assert!(question.contains("weather"));

        decision.clarification_question = Some(question);
        decision.apply_to(&mut state);
        assert!(state.needs_clarification);
    }

    #[test]
    fn no_candidate_asks_for_clarification() {
        let supervisor = supervisor();
        let state = state();

        let decision = supervisor
            .decide(RoutingInput {
                query: "tell me a joke",
                state: &state,
                steps: &[],
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.action, ReasoningAction::AskClarification);
        assert_eq!(decision.reason, DecisionReason::NoCandidate);
        assert!(decision
            .clarification_question
            .as_deref()
            .is_some_and(|question| question.contains("marine weather forecasts")));
    }

    #[test]
    fn degraded_dependency_is_skipped_not_retried() {
        let supervisor = supervisor();
        let mut state = state();
        state.mark_degraded(&CapabilityId::new("route_agent"), "route", "circuit open");

        let decision = supervisor
            .decide(RoutingInput {
                query: "cheapest bunker",
                state: &state,
                steps: &steps(1),
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.next_capability, Some(CapabilityId::new("bunker_agent")));
    }

    #[test]
    fn finalize_after_abandoned_capability_reports_partial_data() {
        let supervisor = supervisor();
        let mut state = state();
        state.mark_degraded(&CapabilityId::new("weather_agent"), "weather", "retries exhausted");

        let decision = supervisor
            .decide(RoutingInput {
                query: "weather forecast for Singapore",
                state: &state,
                steps: &steps(1),
                classification: None,
            })
            .expect("decision");

        assert_eq!(decision.action, ReasoningAction::Finalize);
        assert_eq!(decision.reason, DecisionReason::PartialData);
        let step = decision.step.expect("finalize step");
        assert_eq!(step.action_params.get("reason").map(String::as_str), Some("partial_data"));
        assert_eq!(step.action_params.get("abandoned").map(String::as_str), Some("weather_agent"));
    }

    #[test]
    fn structural_errors_are_rejected() {
        let supervisor = supervisor();
        let state = state();
        let out_of_order = vec![ReasoningStep::new(2, "skip", ReasoningAction::CallAgent)];

        let error = supervisor
            .decide(RoutingInput {
                query: "weather",
                state: &state,
                steps: &out_of_order,
                classification: None,
            })
            .expect_err("out of order history");
        assert!(matches!(error, SupervisorError::InvalidState(_)));

        let empty = ReasoningSupervisor::new(
            Arc::new(CapabilityRegistry::new()),
            SupervisorLimits::default(),
        );
        assert_eq!(
            empty
                .decide(RoutingInput {
                    query: "weather",
                    state: &state,
                    steps: &[],
                    classification: None,
                })
                .expect_err("empty registry"),
            SupervisorError::NoCapabilities
        );
    }
}
