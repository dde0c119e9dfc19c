use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::tool::ToolId;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(pub String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    #[serde(default)]
    pub required: Vec<ToolId>,
    #[serde(default)]
    pub optional: Vec<ToolId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDependencies {
    #[serde(default)]
    pub upstream: Vec<CapabilityId>,
    #[serde(default)]
    pub downstream: Vec<CapabilityId>,
}

/// A routable unit of work. Descriptors are immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: CapabilityId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tools: ToolBinding,
    #[serde(default)]
    pub dependencies: CapabilityDependencies,
    #[serde(default)]
    pub deterministic: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// State data key this capability populates. Defaults to the capability id.
    #[serde(default)]
    pub output_key: Option<String>,
    /// Vocabulary for the keyword fallback matcher.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl CapabilityDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: CapabilityId::new(id),
            description: String::new(),
            intents: Vec::new(),
            capabilities: Vec::new(),
            tools: ToolBinding::default(),
            dependencies: CapabilityDependencies::default(),
            deterministic: false,
            enabled: true,
            output_key: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intents = intents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.required = tools.into_iter().map(ToolId::new).collect();
        self
    }

    pub fn with_optional_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.optional = tools.into_iter().map(ToolId::new).collect();
        self
    }

    pub fn with_upstream<I, S>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.upstream = upstream.into_iter().map(CapabilityId::new).collect();
        self
    }

    pub fn with_downstream<I, S>(mut self, downstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.downstream = downstream.into_iter().map(CapabilityId::new).collect();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = Some(output_key.into());
        self
    }

    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().filter(|key| !key.trim().is_empty()).unwrap_or(&self.id.0)
    }

    /// Required tools followed by optional ones, in declared order, without repeats.
    pub fn all_tools(&self) -> Vec<ToolId> {
        let mut tools: Vec<ToolId> = Vec::new();
        for tool in self.tools.required.iter().chain(self.tools.optional.iter()) {
            if !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::CapabilityDescriptor;
    use crate::domain::tool::ToolId;

    #[test]
    fn output_key_defaults_to_capability_id() {
        let descriptor = CapabilityDescriptor::new("route_agent");
        assert_eq!(descriptor.output_key(), "route_agent");

        let descriptor = descriptor.with_output_key("route");
        assert_eq!(descriptor.output_key(), "route");
    }

    #[test]
    fn all_tools_keeps_declared_order_and_drops_repeats() {
        let descriptor = CapabilityDescriptor::new("bunker_agent")
            .with_required_tools(["price_fetch", "route_calculator"])
            .with_optional_tools(["route_calculator", "supplier_lookup"]);

        assert_eq!(
            descriptor.all_tools(),
            vec![
                ToolId::new("price_fetch"),
                ToolId::new("route_calculator"),
                ToolId::new("supplier_lookup"),
            ]
        );
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let descriptor: CapabilityDescriptor = serde_json::from_value(serde_json::json!({
            "id": "weather_agent",
            "tools": { "required": ["weather_fetch"] }
        }))
        .expect("descriptor should deserialize");

        assert!(descriptor.enabled);
        assert!(!descriptor.deterministic);
        assert!(descriptor.dependencies.upstream.is_empty());
        assert_eq!(descriptor.tools.required, vec![ToolId::new("weather_fetch")]);
    }
}
