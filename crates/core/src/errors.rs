use std::time::Duration;

use thiserror::Error;

/// Failures raised while building or reloading the registries. All of them are
/// fatal at bootstrap and propagate to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("validation failed for `{id}`: {}", issues.join("; "))]
    Validation { id: String, issues: Vec<String> },
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
    #[error("capability `{capability_id}` references unknown tool `{tool_id}`")]
    UnknownToolReference { capability_id: String, tool_id: String },
    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
    #[error("capability `{capability_id}` depends on unknown capability `{dependency}`")]
    UnknownDependency { capability_id: String, dependency: String },
    #[error("`{0}` is not registered")]
    NotFound(String),
    #[error("config source failure: {0}")]
    Source(String),
}

impl RegistryError {
    pub fn cycle_path(&self) -> Option<String> {
        match self {
            Self::CircularDependency { cycle } => Some(cycle.join(" -> ")),
            _ => None,
        }
    }
}

/// Outcome reported by a tool implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    /// Timeouts, server errors, network drops. Worth retrying.
    #[error("transient tool failure: {0}")]
    Transient(String),
    /// Bad requests and schema failures. Retrying cannot help.
    #[error("permanent tool failure: {0}")]
    Permanent(String),
}

impl ToolError {
    pub fn timeout(after: Duration) -> Self {
        Self::Transient(format!("timed out after {}ms", after.as_millis()))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Outcome of a call routed through the resilience layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("circuit open for tool `{tool_id}`; retry in {retry_after_ms}ms")]
    CircuitOpen { tool_id: String, retry_after_ms: u64 },
    #[error("tool `{tool_id}` failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { tool_id: String, attempts: u32, last_error: String },
    #[error("tool `{tool_id}` rejected the call: {message}")]
    Permanent { tool_id: String, message: String },
}

impl ToolCallError {
    pub fn tool_id(&self) -> &str {
        match self {
            Self::CircuitOpen { tool_id, .. }
            | Self::RetriesExhausted { tool_id, .. }
            | Self::Permanent { tool_id, .. } => tool_id,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Permanent { .. } => "permanent",
        }
    }
}

/// The supervisor only fails for inputs it cannot reason about at all.
/// Ambiguous queries become clarification decisions instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("no capabilities are registered")]
    NoCapabilities,
    #[error("invalid conversation state: {0}")]
    InvalidState(String),
}
