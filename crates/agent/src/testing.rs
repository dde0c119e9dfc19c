//! Scripted doubles for the model client and tool executor, shared by unit
//! and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use helmsman_core::errors::ToolError;
use serde_json::Value;

use crate::llm::ModelClient;
use crate::tools::ToolExecutor;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replays responses in order; the last one repeats once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    responses: Vec<Result<String, String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self { responses, ..Self::default() }
    }

    pub fn always(response: impl Into<String>) -> Self {
        Self::new(vec![Ok(response.into())])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![Err(message.into())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn user_prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(user_prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let Some(last) = self.responses.len().checked_sub(1) else {
            return Err(anyhow!("no scripted model response"));
        };
        match &self.responses[index.min(last)] {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }
}

#[derive(Default)]
struct ToolScript {
    queued: VecDeque<Result<Value, ToolError>>,
    fallback: Option<Result<Value, ToolError>>,
    delay: Option<Duration>,
    calls: usize,
    inputs: Vec<Value>,
}

/// Per-tool outcome queues with an optional repeating fallback. Tools
/// without a script fail permanently.
#[derive(Default)]
pub struct ScriptedToolExecutor {
    scripts: Mutex<HashMap<String, ToolScript>>,
}

impl ScriptedToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(self, tool_id: &str, outcomes: Vec<Result<Value, ToolError>>) -> Self {
        lock(&self.scripts).entry(tool_id.to_string()).or_default().queued.extend(outcomes);
        self
    }

    pub fn with_default(self, tool_id: &str, outcome: Result<Value, ToolError>) -> Self {
        lock(&self.scripts).entry(tool_id.to_string()).or_default().fallback = Some(outcome);
        self
    }

    pub fn with_delay(self, tool_id: &str, delay: Duration) -> Self {
        lock(&self.scripts).entry(tool_id.to_string()).or_default().delay = Some(delay);
        self
    }

    pub fn calls_for(&self, tool_id: &str) -> usize {
        lock(&self.scripts).get(tool_id).map(|script| script.calls).unwrap_or(0)
    }

    pub fn inputs_for(&self, tool_id: &str) -> Vec<Value> {
        lock(&self.scripts).get(tool_id).map(|script| script.inputs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedToolExecutor {
    async fn execute(&self, tool_id: &str, input: Value) -> Result<Value, ToolError> {
        let (outcome, delay) = {
            let mut scripts = lock(&self.scripts);
            let script = scripts.entry(tool_id.to_string()).or_default();
            script.calls += 1;
            script.inputs.push(input);
            let outcome = script.queued.pop_front().or_else(|| script.fallback.clone());
            (outcome, script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome.unwrap_or_else(|| {
            Err(ToolError::Permanent(format!("no scripted outcome for `{tool_id}`")))
        })
    }
}

#[cfg(test)]
mod tests {
    use helmsman_core::errors::ToolError;
    use serde_json::json;

    use super::{ScriptedModelClient, ScriptedToolExecutor};
    use crate::llm::ModelClient;
    use crate::tools::ToolExecutor;

    #[tokio::test]
    async fn model_script_repeats_last_response() {
        let client = ScriptedModelClient::new(vec![Err("boom".to_string()), Ok("{}".to_string())]);

        assert!(client.complete("sys", "first").await.is_err());
        assert_eq!(client.complete("sys", "second").await.expect("ok"), "{}");
        assert_eq!(client.complete("sys", "third").await.expect("ok"), "{}");
        assert_eq!(client.calls(), 3);
        assert_eq!(client.user_prompts()[1], "second");
    }

    #[tokio::test]
    async fn tool_script_drains_queue_then_uses_fallback() {
        let executor = ScriptedToolExecutor::new()
            .with_outcomes("price_fetch", vec![Err(ToolError::Transient("503".to_string()))])
            .with_default("price_fetch", Ok(json!({ "usd": 610 })));

        assert!(executor.execute("price_fetch", json!({})).await.is_err());
        assert_eq!(executor.execute("price_fetch", json!({})).await, Ok(json!({ "usd": 610 })));
        assert!(executor.execute("unscripted", json!({})).await.is_err());
        assert_eq!(executor.calls_for("price_fetch"), 2);
    }
}
