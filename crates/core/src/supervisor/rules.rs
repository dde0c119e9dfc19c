//! Deterministic routing rules. Everything here is a pure function of the
//! capability registry and the conversation state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::capability::CapabilityId;
use crate::domain::state::ConversationState;
use crate::errors::RegistryError;
use crate::registry::capabilities::CapabilityRegistry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub capability_id: CapabilityId,
    /// Number of distinct keywords found in the query.
    pub score: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub before: CapabilityId,
    pub after: CapabilityId,
}

/// Where routing stands for a set of target capabilities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// First chain member that still has to run.
    pub next: Option<CapabilityId>,
    /// Members whose output is already in state.
    pub satisfied: Vec<CapabilityId>,
    /// Members that degraded this request or cannot run (disabled).
    pub abandoned: Vec<CapabilityId>,
    /// Combined dependency chains of every target, dependencies first.
    pub chain: Vec<CapabilityId>,
}

impl RoutePlan {
    pub fn is_complete(&self) -> bool {
        self.next.is_none()
    }
}

/// Lowercases and reduces everything that is not a letter or digit to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Enabled capabilities whose keywords occur in `query` as whole words or
/// phrases, best score first. Ties keep registration order.
pub fn keyword_candidates(registry: &CapabilityRegistry, query: &str) -> Vec<KeywordMatch> {
    let haystack = format!(" {} ", normalize_text(query));

    let mut matches = registry
        .get_enabled()
        .into_iter()
        .filter_map(|descriptor| {
            let keywords = descriptor
                .keywords
                .iter()
                .map(|keyword| normalize_text(keyword))
                .filter(|keyword| !keyword.is_empty())
                .collect::<BTreeSet<_>>();
            let score = keywords
                .iter()
                .filter(|keyword| haystack.contains(&format!(" {keyword} ")))
                .count();
            (score > 0).then(|| KeywordMatch { capability_id: descriptor.id.clone(), score })
        })
        .collect::<Vec<_>>();

    matches.sort_by(|left, right| right.score.cmp(&left.score));
    matches
}

/// One constraint per declared upstream edge, in registration order.
pub fn ordering_constraints(registry: &CapabilityRegistry) -> Vec<OrderingConstraint> {
    registry
        .get_all()
        .into_iter()
        .flat_map(|descriptor| {
            descriptor.dependencies.upstream.iter().map(|upstream| OrderingConstraint {
                before: upstream.clone(),
                after: descriptor.id.clone(),
            })
        })
        .collect()
}

pub fn render_constraints(constraints: &[OrderingConstraint]) -> String {
    if constraints.is_empty() {
        return "- capabilities have no ordering requirements".to_string();
    }
    constraints
        .iter()
        .map(|constraint| {
            format!("- {} must run before {}", constraint.before, constraint.after)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Walks the dependency chain of every target and finds the first capability
/// that still has to run.
pub fn plan(
    registry: &CapabilityRegistry,
    targets: &[CapabilityId],
    state: &ConversationState,
) -> Result<RoutePlan, RegistryError> {
    let mut plan = RoutePlan::default();

    for target in targets {
        for member in registry.dependency_chain(target.as_str())? {
            if plan.chain.contains(&member) {
                continue;
            }
            plan.chain.push(member.clone());

            let Some(descriptor) = registry.get_by_id(member.as_str()) else {
                plan.abandoned.push(member);
                continue;
            };
            let key = descriptor.output_key();
            if state.has_data(key) {
                plan.satisfied.push(member);
            } else if state.is_missing(key) || !descriptor.enabled {
                plan.abandoned.push(member);
            } else if plan.next.is_none() {
                plan.next = Some(member);
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        keyword_candidates, normalize_text, ordering_constraints, plan, render_constraints,
    };
    use crate::correlation::CorrelationId;
    use crate::domain::capability::{CapabilityDescriptor, CapabilityId};
    use crate::domain::state::ConversationState;
    use crate::errors::RegistryError;
    use crate::registry::capabilities::CapabilityRegistry;
    use crate::registry::tools::ToolHealthRegistry;

    fn registry() -> CapabilityRegistry {
        let tools = ToolHealthRegistry::new();
        let mut registry = CapabilityRegistry::new();
        for descriptor in [
            CapabilityDescriptor::new("route_agent")
                .with_keywords(["route", "distance", "voyage"])
                .with_output_key("route"),
            CapabilityDescriptor::new("weather_agent")
                .with_keywords(["weather", "forecast", "wind"])
                .with_output_key("weather"),
            CapabilityDescriptor::new("bunker_agent")
                .with_keywords(["bunker", "fuel", "cheapest"])
                .with_upstream(["route_agent"])
                .with_output_key("bunker"),
            CapabilityDescriptor::new("legacy_agent").with_keywords(["bunker"]).disabled(),
        ] {
            registry.register(descriptor, &tools).expect("fixture");
        }
        registry
    }

    fn state() -> ConversationState {
        ConversationState::new(CorrelationId::inherit_or_generate(Some("req-rules")))
    }

    fn ids(list: &[CapabilityId]) -> Vec<&str> {
        list.iter().map(CapabilityId::as_str).collect()
    }

    #[test]
    fn normalization_strips_punctuation_and_case() {
        assert_eq!(normalize_text("  What's the WEATHER, at Singapore?\n"), "what s the weather at singapore");
    }

    #[test]
    fn keyword_matching_uses_whole_words_and_ranks_by_score() {
        let registry = registry();

        let matches = keyword_candidates(&registry, "Find cheapest bunker fuel for the voyage");
        assert_eq!(matches[0].capability_id.as_str(), "bunker_agent");
        assert_eq!(matches[0].score, 3);
        assert_eq!(matches[1].capability_id.as_str(), "route_agent");
        assert_eq!(matches.len(), 2);

        assert!(keyword_candidates(&registry, "rerouted windsurfing").is_empty());
    }

    #[test]
    fn ordering_constraints_follow_upstream_edges() {
        let registry = registry();
        let constraints = ordering_constraints(&registry);

        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].before.as_str(), "route_agent");
        assert_eq!(constraints[0].after.as_str(), "bunker_agent");
        assert_eq!(render_constraints(&constraints), "- route_agent must run before bunker_agent");
    }

    #[test]
    fn plan_runs_upstream_first_then_skips_populated_output() {
        let registry = registry();
        let targets = vec![CapabilityId::new("bunker_agent")];
        let mut state = state();

        let first = plan(&registry, &targets, &state).expect("plan");
        assert_eq!(first.next, Some(CapabilityId::new("route_agent")));
        assert_eq!(ids(&first.chain), vec!["route_agent", "bunker_agent"]);

        state.record_success(&CapabilityId::new("route_agent"), "route", json!({ "nm": 8288 }));
        let second = plan(&registry, &targets, &state).expect("plan");
        assert_eq!(second.next, Some(CapabilityId::new("bunker_agent")));
        assert_eq!(ids(&second.satisfied), vec!["route_agent"]);

        state.record_success(&CapabilityId::new("bunker_agent"), "bunker", json!({ "usd": 612 }));
        assert!(plan(&registry, &targets, &state).expect("plan").is_complete());
    }

    #[test]
    fn degraded_and_disabled_members_are_abandoned() {
        let registry = registry();
        let mut state = state();
        state.mark_degraded(&CapabilityId::new("route_agent"), "route", "circuit open");

        let result = plan(
            &registry,
            &[CapabilityId::new("bunker_agent"), CapabilityId::new("legacy_agent")],
            &state,
        )
        .expect("plan");

        assert_eq!(result.next, Some(CapabilityId::new("bunker_agent")));
        assert_eq!(ids(&result.abandoned), vec!["route_agent", "legacy_agent"]);
    }

    #[test]
    fn unknown_target_is_a_planning_error() {
        let registry = registry();
        assert_eq!(
            plan(&registry, &[CapabilityId::new("ghost_agent")], &state()),
            Err(RegistryError::NotFound("ghost_agent".to_string()))
        );
    }
}
