use std::collections::HashMap;

use async_trait::async_trait;
use helmsman_core::domain::state::ConversationState;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint for `{conversation_id}` is corrupt: {source}")]
    Corrupt { conversation_id: String, source: serde_json::Error },
}

/// Opaque persistence for conversation state between turns.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConversationState,
    ) -> Result<(), CheckpointError>;
    async fn load(&self, conversation_id: &str)
        -> Result<Option<ConversationState>, CheckpointError>;
}

/// Keeps serialized snapshots so a restored state never aliases a live one.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConversationState,
    ) -> Result<(), CheckpointError> {
        let encoded = serde_json::to_string(state).map_err(|source| CheckpointError::Corrupt {
            conversation_id: conversation_id.to_string(),
            source,
        })?;
        self.snapshots.write().await.insert(conversation_id.to_string(), encoded);
        Ok(())
    }

    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationState>, CheckpointError> {
        let snapshots = self.snapshots.read().await;
        let Some(encoded) = snapshots.get(conversation_id) else {
            return Ok(None);
        };
        serde_json::from_str(encoded).map(Some).map_err(|source| CheckpointError::Corrupt {
            conversation_id: conversation_id.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use helmsman_core::correlation::CorrelationId;
    use helmsman_core::domain::capability::CapabilityId;
    use helmsman_core::domain::state::ConversationState;
    use serde_json::json;

    use super::{CheckpointStore, InMemoryCheckpointStore};

    #[tokio::test]
    async fn save_then_load_restores_state() {
        let store = InMemoryCheckpointStore::new();
        let mut state =
            ConversationState::new(CorrelationId::inherit_or_generate(Some("req-checkpoint")));
        state.push_user_message("route from Singapore to Rotterdam");
        state.record_success(&CapabilityId::new("route_agent"), "route", json!({ "nm": 8288 }));

        store.save("conv-1", &state).await.expect("save");
        let restored = store.load("conv-1").await.expect("load").expect("present");

        assert_eq!(restored, state);
        assert!(store.load("conv-2").await.expect("load").is_none());
    }
}
