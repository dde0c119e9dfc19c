use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::capability::CapabilityId;
use crate::errors::RegistryError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(pub String);

impl ToolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Calculation,
    DataFetch,
    Validation,
    Optimization,
    Integration,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculation => "calculation",
            Self::DataFetch => "data_fetch",
            Self::Validation => "validation",
            Self::Optimization => "optimization",
            Self::Integration => "integration",
        }
    }
}

impl std::str::FromStr for ToolCategory {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "calculation" => Ok(Self::Calculation),
            "data_fetch" => Ok(Self::DataFetch),
            "validation" => Ok(Self::Validation),
            "optimization" => Ok(Self::Optimization),
            "integration" => Ok(Self::Integration),
            other => Err(RegistryError::Validation {
                id: "category".to_string(),
                issues: vec![format!(
                    "unsupported tool category `{other}` (expected calculation|data_fetch|validation|optimization|integration)"
                )],
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Free,
    ApiCall,
    Expensive,
}

impl std::str::FromStr for CostClass {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "api_call" => Ok(Self::ApiCall),
            "expensive" => Ok(Self::Expensive),
            other => Err(RegistryError::Validation {
                id: "cost".to_string(),
                issues: vec![format!(
                    "unsupported cost class `{other}` (expected free|api_call|expensive)"
                )],
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDependencies {
    /// Other registered tools this tool calls. Must stay acyclic.
    #[serde(default)]
    pub internal: Vec<ToolId>,
    /// Third-party services, informational only.
    #[serde(default)]
    pub external: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetrics {
    #[serde(default)]
    pub total_calls: u64,
    #[serde(default)]
    pub success_calls: u64,
    #[serde(default)]
    pub failure_calls: u64,
    #[serde(default)]
    pub last_called_at: Option<DateTime<Utc>>,
}

impl ToolMetrics {
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_calls > 0).then(|| self.success_calls as f64 / self.total_calls as f64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub category: ToolCategory,
    #[serde(default)]
    pub domain: Vec<String>,
    /// Capabilities that invoke this tool.
    #[serde(default)]
    pub agent_ids: Vec<CapabilityId>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(default = "empty_object_schema")]
    pub output_schema: Value,
    pub cost: CostClass,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub max_latency_ms: f64,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default)]
    pub dependencies: ToolDependencies,
    #[serde(default)]
    pub metrics: ToolMetrics,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub replaced_by: Option<ToolId>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_reliability() -> f64 {
    1.0
}

pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            id: ToolId::new(id),
            name: name.into(),
            description: description.into(),
            version: default_version(),
            category,
            domain: Vec::new(),
            agent_ids: Vec::new(),
            input_schema: empty_object_schema(),
            output_schema: empty_object_schema(),
            cost: CostClass::Free,
            avg_latency_ms: 0.0,
            max_latency_ms: 0.0,
            reliability: default_reliability(),
            dependencies: ToolDependencies::default(),
            metrics: ToolMetrics::default(),
            deprecated: false,
            replaced_by: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_domain<I, S>(mut self, domain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = domain.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_ids = agents.into_iter().map(CapabilityId::new).collect();
        self
    }

    pub fn with_schemas(mut self, input_schema: Value, output_schema: Value) -> Self {
        self.input_schema = input_schema;
        self.output_schema = output_schema;
        self
    }

    pub fn with_cost(mut self, cost: CostClass) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_latency(mut self, avg_latency_ms: f64, max_latency_ms: f64) -> Self {
        self.avg_latency_ms = avg_latency_ms;
        self.max_latency_ms = max_latency_ms;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_internal_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.internal = dependencies.into_iter().map(ToolId::new).collect();
        self
    }

    pub fn deprecated_in_favor_of(mut self, replacement: impl Into<String>) -> Self {
        self.deprecated = true;
        self.replaced_by = Some(ToolId::new(replacement));
        self
    }
}
