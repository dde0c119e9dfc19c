//! Tool health registry: descriptors, validation at registration time, and
//! per-call health metrics smoothed with an exponential moving average.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::capability::CapabilityId;
use crate::domain::tool::{CostClass, ToolCategory, ToolDescriptor, ToolId, ToolMetrics};
use crate::errors::RegistryError;
use crate::registry::graph::{find_cycle, Adjacency};
use crate::registry::source::ConfigSource;

/// Smoothing factor for reliability and latency averages.
pub const EMA_ALPHA: f64 = 0.1;

const MAX_TOOL_ID_LEN: usize = 64;

/// AND-combined filters for [`ToolHealthRegistry::search`]. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolSearchCriteria {
    pub category: Option<ToolCategory>,
    pub domain: Option<String>,
    pub agent_id: Option<CapabilityId>,
    pub min_reliability: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub cost: Option<CostClass>,
    pub exclude_deprecated: bool,
}

impl ToolSearchCriteria {
    fn matches(&self, tool: &ToolDescriptor) -> bool {
        if self.category.is_some_and(|category| category != tool.category) {
            return false;
        }
        if let Some(domain) = &self.domain {
            if !tool.domain.iter().any(|tag| tag.eq_ignore_ascii_case(domain)) {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if !tool.agent_ids.contains(agent_id) {
                return false;
            }
        }
        if self.min_reliability.is_some_and(|min| tool.reliability < min) {
            return false;
        }
        if self.max_latency_ms.is_some_and(|max| tool.avg_latency_ms > max) {
            return false;
        }
        if self.cost.is_some_and(|cost| cost != tool.cost) {
            return false;
        }
        !(self.exclude_deprecated && tool.deprecated)
    }
}

/// Shared across concurrent requests; `record_call` takes `&self`.
#[derive(Debug, Default)]
pub struct ToolHealthRegistry {
    tools: RwLock<BTreeMap<String, ToolDescriptor>>,
}

impl ToolHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ToolDescriptor>> {
        match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ToolDescriptor>> {
        match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, tool: ToolDescriptor) -> Result<(), RegistryError> {
        let issues = validate_descriptor(&tool);
        if !issues.is_empty() {
            return Err(RegistryError::Validation { id: tool.id.0.clone(), issues });
        }

        let mut tools = self.write();
        if tools.contains_key(&tool.id.0) {
            return Err(RegistryError::DuplicateId(tool.id.0.clone()));
        }
        ensure_acyclic(&tools, &tool)?;
        warn_unknown_dependencies(&tools, &tool);

        info!(
            event_name = "registry.tool.registered",
            tool_id = %tool.id,
            category = tool.category.as_str(),
            "tool registered"
        );
        tools.insert(tool.id.0.clone(), tool);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ToolDescriptor> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn all(&self) -> Vec<ToolDescriptor> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records one call outcome and folds it into the reliability and latency EMAs.
    pub fn record_call(
        &self,
        id: &str,
        success: bool,
        latency_ms: f64,
    ) -> Result<ToolMetrics, RegistryError> {
        let mut tools = self.write();
        let tool = tools.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        tool.metrics.total_calls += 1;
        if success {
            tool.metrics.success_calls += 1;
        } else {
            tool.metrics.failure_calls += 1;
        }
        tool.metrics.last_called_at = Some(Utc::now());

        let outcome = if success { 1.0 } else { 0.0 };
        tool.reliability = (EMA_ALPHA * outcome + (1.0 - EMA_ALPHA) * tool.reliability).clamp(0.0, 1.0);
        if latency_ms.is_finite() && latency_ms >= 0.0 {
            tool.avg_latency_ms = EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * tool.avg_latency_ms;
            if latency_ms > tool.max_latency_ms {
                tool.max_latency_ms = latency_ms;
            }
        }

        Ok(tool.metrics.clone())
    }

    pub fn search(&self, criteria: &ToolSearchCriteria) -> Vec<ToolDescriptor> {
        self.read().values().filter(|tool| criteria.matches(tool)).cloned().collect()
    }

    /// Re-reads one descriptor from `source`. Learned health (metrics,
    /// reliability, average latency) carries over to the new descriptor.
    pub fn reload(&self, id: &str, source: &dyn ConfigSource) -> Result<(), RegistryError> {
        let mut fresh = source
            .load_tools()?
            .into_iter()
            .find(|tool| tool.id.0 == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let issues = validate_descriptor(&fresh);
        if !issues.is_empty() {
            return Err(RegistryError::Validation { id: id.to_string(), issues });
        }

        let mut tools = self.write();
        let previous = tools.remove(id);
        if let Some(previous) = &previous {
            fresh.metrics = previous.metrics.clone();
            fresh.reliability = previous.reliability;
            fresh.avg_latency_ms = previous.avg_latency_ms;
        }
        if let Err(error) = ensure_acyclic(&tools, &fresh) {
            if let Some(previous) = previous {
                tools.insert(id.to_string(), previous);
            }
            return Err(error);
        }

        info!(event_name = "registry.tool.reloaded", tool_id = id, "tool descriptor reloaded");
        tools.insert(id.to_string(), fresh);
        Ok(())
    }

    pub fn invalidate(&self, id: &str) -> Option<ToolDescriptor> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            info!(event_name = "registry.tool.invalidated", tool_id = id, "tool descriptor removed");
        }
        removed
    }
}

fn ensure_acyclic(
    tools: &BTreeMap<String, ToolDescriptor>,
    candidate: &ToolDescriptor,
) -> Result<(), RegistryError> {
    let mut adjacency: Adjacency = tools
        .values()
        .map(|tool| (tool.id.0.clone(), internal_ids(tool)))
        .collect();
    adjacency.insert(candidate.id.0.clone(), internal_ids(candidate));

    match find_cycle(&adjacency, &candidate.id.0) {
        Some(cycle) => Err(RegistryError::CircularDependency { cycle }),
        None => Ok(()),
    }
}

fn internal_ids(tool: &ToolDescriptor) -> Vec<String> {
    tool.dependencies.internal.iter().map(|dependency| dependency.0.clone()).collect()
}

fn warn_unknown_dependencies(tools: &BTreeMap<String, ToolDescriptor>, tool: &ToolDescriptor) {
    for dependency in &tool.dependencies.internal {
        if dependency != &tool.id && !tools.contains_key(&dependency.0) {
            warn!(
                event_name = "registry.tool.forward_dependency",
                tool_id = %tool.id,
                dependency = %dependency,
                "internal dependency is not registered yet"
            );
        }
    }
}

/// Collects every problem with a descriptor instead of stopping at the first.
pub fn validate_descriptor(tool: &ToolDescriptor) -> Vec<String> {
    let mut issues = Vec::new();

    if tool.id.0.trim().is_empty() {
        issues.push("id is required".to_string());
    } else if !is_valid_tool_id(&tool.id.0) {
        issues.push(format!(
            "id `{}` must start with a lowercase letter and contain only lowercase letters, digits, or underscores (max {MAX_TOOL_ID_LEN} chars)",
            tool.id
        ));
    }
    if tool.name.trim().is_empty() {
        issues.push("name is required".to_string());
    }
    if tool.description.trim().is_empty() {
        issues.push("description is required".to_string());
    }
    if !is_loose_semver(&tool.version) {
        issues.push(format!("version `{}` must look like MAJOR.MINOR[.PATCH]", tool.version));
    }

    validate_object_schema("input_schema", &tool.input_schema, &mut issues);
    validate_object_schema("output_schema", &tool.output_schema, &mut issues);

    if !tool.reliability.is_finite() || !(0.0..=1.0).contains(&tool.reliability) {
        issues.push(format!("reliability {} must be within 0..=1", tool.reliability));
    }
    if !tool.avg_latency_ms.is_finite() || tool.avg_latency_ms < 0.0 {
        issues.push("avg_latency_ms must be a non-negative number".to_string());
    }
    if !tool.max_latency_ms.is_finite() || tool.max_latency_ms < 0.0 {
        issues.push("max_latency_ms must be a non-negative number".to_string());
    }
    if issues.is_empty() && tool.max_latency_ms < tool.avg_latency_ms {
        warn!(
            event_name = "registry.tool.latency_inconsistent",
            tool_id = %tool.id,
            avg_latency_ms = tool.avg_latency_ms,
            max_latency_ms = tool.max_latency_ms,
            "max latency is below average latency"
        );
    }
    let counted = tool.metrics.success_calls.saturating_add(tool.metrics.failure_calls);
    if counted > tool.metrics.total_calls {
        issues.push(format!(
            "metrics: success_calls + failure_calls ({counted}) exceeds total_calls ({})",
            tool.metrics.total_calls
        ));
    }
    if tool.deprecated && tool.replaced_by.as_ref().is_some_and(|replacement| replacement == &tool.id)
    {
        issues.push("a deprecated tool cannot be replaced by itself".to_string());
    }

    issues
}

fn is_valid_tool_id(id: &str) -> bool {
    let mut chars = id.chars();
    let starts_with_letter = chars.next().is_some_and(|first| first.is_ascii_lowercase());
    starts_with_letter
        && id.len() <= MAX_TOOL_ID_LEN
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

/// Accepts `1.2`, `1.2.3`, and `1.2.3-beta`.
fn is_loose_semver(version: &str) -> bool {
    let core = version.trim().split(['-', '+']).next().unwrap_or_default();
    let parts = core.split('.').collect::<Vec<_>>();
    (2..=3).contains(&parts.len())
        && parts.iter().all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
}

fn validate_object_schema(field: &str, schema: &Value, issues: &mut Vec<String>) {
    let Some(object) = schema.as_object() else {
        issues.push(format!("{field} must be a JSON object"));
        return;
    };
    if object.get("type").and_then(Value::as_str) != Some("object") {
        issues.push(format!("{field}.type must be `object`"));
    }

    let properties = match object.get("properties") {
        None => None,
        Some(Value::Object(properties)) => Some(properties),
        Some(_) => {
            issues.push(format!("{field}.properties must be an object"));
            return;
        }
    };

    let Some(required) = object.get("required") else {
        return;
    };
    let Some(required) = required.as_array() else {
        issues.push(format!("{field}.required must be an array of property names"));
        return;
    };
    for name in required {
        match name.as_str() {
            Some(name) if properties.is_some_and(|props| props.contains_key(name)) => {}
            Some(name) => {
                issues.push(format!("{field}.required lists `{name}` which is not in properties"))
            }
            None => issues.push(format!("{field}.required must only contain strings")),
        }
    }
}
