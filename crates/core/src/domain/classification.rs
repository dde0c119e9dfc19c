use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::capability::CapabilityId;

/// Result of mapping free text onto a registered capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub agent_id: CapabilityId,
    pub intent: String,
    /// Always within `0.0..=1.0`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub extracted_params: BTreeMap<String, String>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
    pub query_hash: String,
}

impl IntentClassification {
    pub fn meets(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
    }
}
