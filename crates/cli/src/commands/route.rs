use std::path::PathBuf;

use helmsman_core::correlation::CorrelationId;
use helmsman_core::domain::state::ConversationState;
use helmsman_core::events::{
    EventCategory, EventOutcome, EventSink, RoutingEvent, TracingEventSink,
};
use helmsman_core::supervisor::{ReasoningSupervisor, RoutingInput, SupervisorLimits};
use serde_json::json;

use crate::commands::{load_catalog, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct RouteArgs {
    pub query: String,
    pub catalog: Option<PathBuf>,
    /// Capabilities whose data should be treated as already collected.
    pub have: Vec<String>,
}

/// One keyword-routed supervisor decision, without calling any tool.
pub fn run(args: &RouteArgs) -> CommandResult {
    let loaded = match load_catalog("route", args.catalog.as_deref()) {
        Ok(loaded) => loaded,
        Err(failure) => return failure,
    };
    let capabilities = &loaded.registries.capabilities;

    let mut state = ConversationState::new(CorrelationId::generate());
    state.push_user_message(args.query.as_str());
    for capability in &args.have {
        let Some(descriptor) = capabilities.get_by_id(capability) else {
            return CommandResult::failure(
                "route",
                "unknown_capability",
                format!("`{capability}` is not in the catalog"),
                5,
            );
        };
        state.record_success(
            &descriptor.id,
            descriptor.output_key(),
            json!({ "provided_by": "cli" }),
        );
    }

    let supervisor = ReasoningSupervisor::new(
        loaded.registries.capabilities.clone(),
        SupervisorLimits::from(&loaded.config.routing),
    );
    let decision = match supervisor.decide(RoutingInput {
        query: &args.query,
        state: &state,
        steps: &[],
        classification: None,
    }) {
        Ok(decision) => decision,
        Err(error) => return CommandResult::failure("route", "supervisor", error.to_string(), 6),
    };

    let outcome = if decision.needs_clarification {
        EventOutcome::Degraded
    } else {
        EventOutcome::Success
    };
    TracingEventSink.emit(
        RoutingEvent::new(
            state.correlation_id(),
            "routing.dry_run",
            EventCategory::Routing,
            outcome,
        )
        .with_metadata("action", decision.action.as_str())
        .with_metadata(
            "next_capability",
            decision.next_capability.as_ref().map(|id| id.as_str()).unwrap_or_default(),
        ),
    );

    let message = match &decision.next_capability {
        Some(next) => format!("next capability: {next}"),
        None => format!("{} ({:?})", decision.action.as_str(), decision.reason),
    };
    match serde_json::to_value(&decision) {
        Ok(data) => CommandResult::success_with_data("route", message, data),
        Err(error) => CommandResult::failure("route", "serialization", error.to_string(), 1),
    }
}
