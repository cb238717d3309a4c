use crate::domain::models::ChainId;
use crate::domain::polyvagal::PolyvagalState;
use serde::Serialize;
use tokio::sync::broadcast;

/// Things the engine did that a UI layer may want to react to (haptics,
/// sounds, toasts). The engine never calls device APIs itself.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    CatalogRefreshed { blocks: usize },
    CatalogFetchFailed { served_stale: bool },
    ChainStarted { chain_id: ChainId },
    CheckRecorded { chain_id: ChainId, state: PolyvagalState },
    BlockCompleted { chain_id: ChainId, block_id: i64, order_index: i32 },
    ChainEnded { chain_id: ChainId },
    SosSelected { block_id: i64 },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; having no listener is fine.
    pub fn publish(&self, event: EngineEvent) {
        tracing::debug!(?event, "engine event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
