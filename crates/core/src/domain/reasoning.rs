use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningAction {
    CallAgent,
    Finalize,
    AskClarification,
}

impl ReasoningAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallAgent => "call_agent",
            Self::Finalize => "finalize",
            Self::AskClarification => "ask_clarification",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::CallAgent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_number: u32,
    pub thought: String,
    pub action: ReasoningAction,
    #[serde(default)]
    pub action_params: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(step_number: u32, thought: impl Into<String>, action: ReasoningAction) -> Self {
        Self {
            step_number,
            thought: thought.into(),
            action,
            action_params: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.action_params.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("reasoning trace is full ({limit} steps)")]
    Full { limit: usize },
    #[error("reasoning step out of order: expected {expected}, got {actual}")]
    OutOfOrder { expected: u32, actual: u32 },
}

/// Append-only step history for one request, capped at `limit` entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    steps: Vec<ReasoningStep>,
    limit: usize,
}

impl ReasoningTrace {
    pub fn new(limit: usize) -> Self {
        Self { steps: Vec::new(), limit }
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.steps.len() >= self.limit
    }

    pub fn last(&self) -> Option<&ReasoningStep> {
        self.steps.last()
    }

    pub fn push(&mut self, step: ReasoningStep) -> Result<(), TraceError> {
        if self.is_exhausted() {
            return Err(TraceError::Full { limit: self.limit });
        }
        let expected = self.steps.len() as u32 + 1;
        if step.step_number != expected {
            return Err(TraceError::OutOfOrder { expected, actual: step.step_number });
        }
        self.steps.push(step);
        Ok(())
    }
}
