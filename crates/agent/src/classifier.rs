//! Model-assisted intent classification with a shared result cache.
//!
//! Classification is advisory. Every failure (transport, timeout, malformed
//! or invalid output) yields `None`, and the supervisor falls back to its
//! keyword rules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use helmsman_core::config::{AppConfig, ClassifierConfig};
use helmsman_core::correlation::CorrelationId;
use helmsman_core::domain::capability::CapabilityId;
use helmsman_core::domain::classification::IntentClassification;
use helmsman_core::events::{EventCategory, EventOutcome, EventSink, RoutingEvent};
use helmsman_core::registry::CapabilityRegistry;
use helmsman_core::supervisor::rules::{ordering_constraints, render_constraints};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::llm::ModelClient;

pub const SYSTEM_PROMPT: &str = "You are an intent router. Pick the single capability that \
should handle the user's request next. Reply with one JSON object and nothing else: \
{\"agent_id\": string, \"intent\": string, \"confidence\": number between 0 and 1, \
\"reasoning\": string, \"extracted_params\": object with string values}. \
agent_id must be one of the listed capability ids.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// Read from and write to the cache.
    pub use_cache: bool,
    /// Ignore any cached entry but still store the fresh result.
    pub skip_cache: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self { use_cache: true, skip_cache: false }
    }
}

pub struct IntentClassifier {
    model: Arc<dyn ModelClient>,
    cache: Arc<dyn Cache>,
    capabilities: Arc<CapabilityRegistry>,
    events: Arc<dyn EventSink>,
    config: ClassifierConfig,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(
        model: Arc<dyn ModelClient>,
        cache: Arc<dyn Cache>,
        capabilities: Arc<CapabilityRegistry>,
        events: Arc<dyn EventSink>,
        config: ClassifierConfig,
        timeout: Duration,
    ) -> Self {
        Self { model, cache, capabilities, events, config, timeout }
    }

    /// Builds a classifier from the `classifier` section, with the model call
    /// bounded by `llm.timeout_secs`. Returns `None` when classification is
    /// switched off, leaving routing to the keyword rules.
    pub fn from_config(
        config: &AppConfig,
        model: Arc<dyn ModelClient>,
        cache: Arc<dyn Cache>,
        capabilities: Arc<CapabilityRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Option<Self> {
        if !config.classifier.enabled {
            info!(
                event_name = "classification.disabled",
                "classifier disabled by configuration; using keyword routing"
            );
            return None;
        }
        Some(Self::new(
            model,
            cache,
            capabilities,
            events,
            config.classifier.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache_key(&self, query: &str) -> String {
        let normalized = normalize_query(query, self.config.max_query_chars);
        format!("{}{}", self.config.cache_prefix, query_hash(&normalized))
    }

    pub async fn classify(
        &self,
        query: &str,
        correlation_id: &CorrelationId,
        options: ClassifyOptions,
    ) -> Option<IntentClassification> {
        let started = Instant::now();
        let normalized = normalize_query(query, self.config.max_query_chars);
        if normalized.is_empty() {
            self.record_failure(correlation_id, "", "empty_query", started);
            return None;
        }
        let hash = query_hash(&normalized);
        let key = format!("{}{}", self.config.cache_prefix, hash);

        if options.use_cache && !options.skip_cache {
            if let Some(hit) = self.lookup(&key, correlation_id, started).await {
                return Some(hit);
            }
        }

        let user_prompt = self.user_prompt(query);
        let response =
            match tokio::time::timeout(self.timeout, self.model.complete(SYSTEM_PROMPT, &user_prompt))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "classification.model_error",
                        correlation_id = %correlation_id,
                        error = %error,
                        "model call failed"
                    );
                    self.record_failure(correlation_id, &hash, "model_error", started);
                    return None;
                }
                Err(_) => {
                    warn!(
                        event_name = "classification.timeout",
                        correlation_id = %correlation_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "model call timed out"
                    );
                    self.record_failure(correlation_id, &hash, "timeout", started);
                    return None;
                }
            };

        let Some(payload) = extract_json_object(&response) else {
            self.record_failure(correlation_id, &hash, "unparseable_response", started);
            return None;
        };
        let mut classification = match self.validate(payload, &hash) {
            Ok(classification) => classification,
            Err(reason) => {
                debug!(
                    event_name = "classification.invalid",
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "model output rejected"
                );
                self.record_failure(correlation_id, &hash, &reason, started);
                return None;
            }
        };

        let prompt_chars = SYSTEM_PROMPT.len() + user_prompt.len() + response.len();
        classification.cost_usd = estimate_cost(prompt_chars, self.config.price_per_1k_tokens_usd);
        classification.latency_ms = started.elapsed().as_millis() as u64;

        if options.use_cache {
            self.store(&key, &classification, correlation_id).await;
        }

        info!(
            event_name = "classification.classified",
            correlation_id = %correlation_id,
            agent_id = %classification.agent_id,
            confidence = classification.confidence,
            latency_ms = classification.latency_ms,
            "query classified"
        );
        self.events.emit(
            RoutingEvent::new(
                correlation_id,
                "classification.classified",
                EventCategory::Classification,
                EventOutcome::Success,
            )
            .with_metadata("agent_id", &classification.agent_id)
            .with_metadata("confidence", classification.confidence)
            .with_metadata("query_hash", &hash)
            .with_metadata("cost_usd", classification.cost_usd),
        );
        Some(classification)
    }

    async fn lookup(
        &self,
        key: &str,
        correlation_id: &CorrelationId,
        started: Instant,
    ) -> Option<IntentClassification> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(
                    event_name = "classification.cache_unavailable",
                    correlation_id = %correlation_id,
                    error = %error,
                    "cache read failed; calling model"
                );
                return None;
            }
        };

        let mut cached = match serde_json::from_str::<IntentClassification>(&raw) {
            Ok(cached) => cached,
            Err(error) => {
                warn!(
                    event_name = "classification.cache_corrupt",
                    correlation_id = %correlation_id,
                    error = %error,
                    "ignoring unreadable cache entry"
                );
                return None;
            }
        };
        if !self.capabilities.is_enabled(cached.agent_id.as_str()) {
            debug!(
                event_name = "classification.cache_stale",
                correlation_id = %correlation_id,
                agent_id = %cached.agent_id,
                "cached capability is no longer routable"
            );
            return None;
        }

        cached.cache_hit = true;
        cached.cost_usd = 0.0;
        cached.latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            event_name = "classification.cache_hit",
            correlation_id = %correlation_id,
            agent_id = %cached.agent_id,
            "classification served from cache"
        );
        self.events.emit(
            RoutingEvent::new(
                correlation_id,
                "classification.cache_hit",
                EventCategory::Classification,
                EventOutcome::Success,
            )
            .with_metadata("agent_id", &cached.agent_id)
            .with_metadata("query_hash", &cached.query_hash),
        );
        Some(cached)
    }

    async fn store(
        &self,
        key: &str,
        classification: &IntentClassification,
        correlation_id: &CorrelationId,
    ) {
        let encoded = match serde_json::to_string(classification) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(
                    event_name = "classification.cache_encode_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "classification not cached"
                );
                return;
            }
        };
        if let Err(error) = self.cache.set(key, encoded, self.config.cache_ttl()).await {
            warn!(
                event_name = "classification.cache_unavailable",
                correlation_id = %correlation_id,
                error = %error,
                "cache write failed"
            );
        }
    }

    fn user_prompt(&self, query: &str) -> String {
        let catalog = self
            .capabilities
            .get_enabled()
            .into_iter()
            .map(|descriptor| {
                let mut line = format!("- {}: {}", descriptor.id, descriptor.description.trim());
                if !descriptor.intents.is_empty() {
                    line.push_str(&format!(" (intents: {})", descriptor.intents.join(", ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        let constraints = render_constraints(&ordering_constraints(&self.capabilities));
        let query = query.trim().chars().take(self.config.max_query_chars).collect::<String>();

        format!("Capabilities:\n{catalog}\n\nRouting rules:\n{constraints}\n\nQuery: {query}")
    }

    fn validate(&self, payload: Map<String, Value>, hash: &str) -> Result<IntentClassification, String> {
        let agent_id = match payload.get("agent_id") {
            Some(Value::String(agent_id)) if !agent_id.trim().is_empty() => agent_id.trim(),
            Some(_) => return Err("agent_id_not_a_string".to_string()),
            None => return Err("missing_agent_id".to_string()),
        };
        if !self.capabilities.is_enabled(agent_id) {
            return Err(format!("unknown_agent:{agent_id}"));
        }
        let intent = match payload.get("intent") {
            Some(Value::String(intent)) => intent.trim().to_string(),
            Some(_) => return Err("intent_not_a_string".to_string()),
            None => return Err("missing_intent".to_string()),
        };
        let confidence = match payload.get("confidence").and_then(Value::as_f64) {
            Some(confidence) if confidence.is_finite() => confidence.clamp(0.0, 1.0),
            Some(_) => return Err("confidence_not_finite".to_string()),
            None => return Err("missing_confidence".to_string()),
        };
        let reasoning =
            payload.get("reasoning").and_then(Value::as_str).unwrap_or_default().to_string();
        let extracted_params = payload
            .get("extracted_params")
            .and_then(Value::as_object)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|value| (key.clone(), value.to_string()))
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        Ok(IntentClassification {
            agent_id: CapabilityId::new(agent_id),
            intent,
            confidence,
            reasoning,
            extracted_params,
            cache_hit: false,
            latency_ms: 0,
            cost_usd: 0.0,
            query_hash: hash.to_string(),
        })
    }

    fn record_failure(
        &self,
        correlation_id: &CorrelationId,
        hash: &str,
        reason: &str,
        started: Instant,
    ) {
        self.events.emit(
            RoutingEvent::new(
                correlation_id,
                "classification.failed",
                EventCategory::Classification,
                EventOutcome::Failed,
            )
            .with_metadata("reason", reason)
            .with_metadata("query_hash", hash)
            .with_metadata("latency_ms", started.elapsed().as_millis()),
        );
    }
}

/// Collapses whitespace, lowercases, and truncates to `max_chars` characters.
pub fn normalize_query(query: &str, max_chars: usize) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(max_chars)
        .collect()
}

pub fn query_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Roughly four characters per token.
pub fn estimate_cost(chars: usize, price_per_1k_tokens_usd: f64) -> f64 {
    let tokens = chars.div_ceil(4) as f64;
    tokens / 1_000.0 * price_per_1k_tokens_usd
}

/// Raw JSON, then with markdown fences stripped, then the outermost braces.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(object);
    }

    let stripped = strip_code_fences(text);
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&stripped) {
        return Some(object);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn strip_code_fences(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || !trimmed.is_empty() {
            lines.push(line);
        }
    }

    lines.join("\n")
}
