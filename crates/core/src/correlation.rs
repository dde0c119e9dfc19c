use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier threading every operation of one logical request.
///
/// There is no setter: a request keeps the id it was created or inherited with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(format!("req-{}", Uuid::new_v4()))
    }

    /// Reuses an upstream id when one was supplied, otherwise generates a new one.
    pub fn inherit_or_generate(upstream: Option<&str>) -> Self {
        match upstream.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => Self(value.to_string()),
            None => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::CorrelationId;

    #[test]
    fn inherits_upstream_id_when_present() {
        let id = CorrelationId::inherit_or_generate(Some("  req-upstream-7 "));
        assert_eq!(id.as_str(), "req-upstream-7");
    }

    #[test]
    fn generates_unique_ids_for_blank_upstream() {
        let first = CorrelationId::inherit_or_generate(Some("   "));
        let second = CorrelationId::inherit_or_generate(None);

        assert!(first.as_str().starts_with("req-"));
        assert_ne!(first, second);
        assert!(!first.is_empty());
    }
}
