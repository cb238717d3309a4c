use crate::db::{ChainStore, KeyValueStore};
use crate::domain::models::{
    ChainId, CompletedBlock, EmbodimentCheck, NewCompletedBlock, NewEmbodimentCheck,
};
use crate::domain::polyvagal::{clamp_score, score_to_state, PolyvagalState};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const ACTIVE_CHAIN_KEY: &str = "somi:active_chain_id";
pub const DEFAULT_RECENT_WINDOW: usize = 2;

#[derive(Default)]
struct ActiveChain {
    id: Option<ChainId>,
    /// Set once the persisted pointer has been read or written by this
    /// tracker; from then on the in-memory id is authoritative.
    hydrated: bool,
    recent_blocks: VecDeque<i64>,
    /// Pointer removal started by the last `end_active_chain`.
    pending_clear: Option<JoinHandle<()>>,
}

impl ActiveChain {
    fn remember(&mut self, block_id: i64, window: usize) {
        self.recent_blocks.push_back(block_id);
        while self.recent_blocks.len() > window {
            self.recent_blocks.pop_front();
        }
    }
}

/// Tracks the device's active practice chain and appends check-ins and
/// completed blocks to it.
///
/// Writes are best effort: a failing store is logged and the caller gets
/// `None`, so the practice flow keeps going.
pub struct SessionTracker {
    store: Arc<dyn ChainStore>,
    kv: Arc<dyn KeyValueStore>,
    pointer_key: String,
    timeout: Duration,
    recent_window: usize,
    events: EventBus,
    active: Mutex<ActiveChain>,
}

pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("Failed to {}: {}", what, e);
            Err(EngineError::store(e))
        }
        Err(_) => {
            tracing::error!("Timed out after {:?} trying to {}", timeout, what);
            Err(EngineError::store(format!("{what}: timed out")))
        }
    }
}

impl SessionTracker {
    pub fn new(
        store: Arc<dyn ChainStore>,
        kv: Arc<dyn KeyValueStore>,
        pointer_key: impl Into<String>,
        timeout: Duration,
        recent_window: usize,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            kv,
            pointer_key: pointer_key.into(),
            timeout,
            recent_window,
            events,
            active: Mutex::new(ActiveChain::default()),
        }
    }

    /// Returns the active chain, creating and persisting one if needed.
    /// Concurrent callers share a single creation.
    pub async fn get_or_create_active_chain(&self) -> Option<ChainId> {
        let mut active = self.active.lock().await;
        self.resolve_active(&mut active).await.ok()
    }

    pub async fn try_get_or_create_active_chain(&self) -> Result<ChainId, EngineError> {
        let mut active = self.active.lock().await;
        self.resolve_active(&mut active).await
    }

    /// Reads the persisted pointer once. A resumed chain also gets its
    /// latest completed blocks back for repetition avoidance.
    async fn hydrate(&self, active: &mut ActiveChain) {
        if active.hydrated {
            return;
        }
        match bounded(self.timeout, "read active chain pointer", self.kv.get(&self.pointer_key)).await {
            Ok(Some(raw)) => match Uuid::parse_str(raw.trim()) {
                Ok(id) => {
                    active.id = Some(id);
                    active.hydrated = true;
                    active.recent_blocks = self.load_recent_blocks(id).await;
                    tracing::info!(
                        "Resumed active chain {} ({} recent blocks)",
                        id,
                        active.recent_blocks.len()
                    );
                }
                Err(_) => {
                    tracing::warn!("Ignoring malformed active chain pointer '{}'", raw);
                    active.hydrated = true;
                }
            },
            Ok(None) => active.hydrated = true,
            Err(_) => tracing::warn!("Active chain pointer unreadable"),
        }
    }

    async fn load_recent_blocks(&self, chain_id: ChainId) -> VecDeque<i64> {
        match bounded(
            self.timeout,
            "load recent blocks",
            self.store.fetch_chain_history(chain_id),
        )
        .await
        {
            Ok(Some(history)) => {
                let skip = history
                    .completed_blocks
                    .len()
                    .saturating_sub(self.recent_window);
                history
                    .completed_blocks
                    .iter()
                    .skip(skip)
                    .map(|detail| detail.completed.block_id)
                    .collect()
            }
            Ok(None) => {
                tracing::warn!("Resumed chain {} has no stored history", chain_id);
                VecDeque::new()
            }
            Err(_) => VecDeque::new(),
        }
    }

    async fn resolve_active(&self, active: &mut ActiveChain) -> Result<ChainId, EngineError> {
        if let Some(id) = active.id {
            return Ok(id);
        }
        self.hydrate(active).await;
        if let Some(id) = active.id {
            return Ok(id);
        }

        let chain = bounded(self.timeout, "create chain", self.store.create_chain()).await?;
        active.id = Some(chain.id);
        active.hydrated = true;
        active.recent_blocks.clear();

        // The removal is bounded by the timeout and must land before the new pointer
        if let Some(pending) = active.pending_clear.take() {
            let _ = pending.await;
        }

        let id = chain.id.to_string();
        if bounded(self.timeout, "persist active chain pointer", self.kv.set(&self.pointer_key, &id))
            .await
            .is_err()
        {
            tracing::warn!("Chain {} is active in memory only", chain.id);
        }

        tracing::info!("Started chain {}", chain.id);
        self.events
            .publish(EngineEvent::ChainStarted { chain_id: chain.id });
        Ok(chain.id)
    }

    /// Records a check-in on the active chain. The state is derived from the
    /// score when not given.
    pub async fn save_embodiment_check(
        &self,
        score: i32,
        state: Option<PolyvagalState>,
    ) -> Option<EmbodimentCheck> {
        let slider_value = clamp_score(score);
        let polyvagal_state = state.unwrap_or_else(|| score_to_state(slider_value));
        let chain_id = self.get_or_create_active_chain().await?;

        let check = bounded(
            self.timeout,
            "save embodiment check",
            self.store.insert_embodiment_check(NewEmbodimentCheck {
                chain_id,
                slider_value,
                polyvagal_state,
            }),
        )
        .await
        .ok()?;

        self.events.publish(EngineEvent::CheckRecorded {
            chain_id,
            state: polyvagal_state,
        });
        Some(check)
    }

    /// Records a finished block. The block counts toward repetition
    /// avoidance even when the write fails.
    pub async fn save_completed_block(
        &self,
        block_id: i64,
        seconds_elapsed: i32,
        order_index: i32,
    ) -> Option<CompletedBlock> {
        let chain_id = {
            let mut active = self.active.lock().await;
            let chain_id = self.resolve_active(&mut active).await.ok()?;
            active.remember(block_id, self.recent_window);
            chain_id
        };

        let completed = bounded(
            self.timeout,
            "save completed block",
            self.store.insert_completed_block(NewCompletedBlock {
                chain_id,
                block_id,
                seconds_elapsed: seconds_elapsed.max(0),
                order_index,
            }),
        )
        .await
        .ok()?;

        self.events.publish(EngineEvent::BlockCompleted {
            chain_id,
            block_id,
            order_index,
        });
        Some(completed)
    }

    /// Detaches the active chain. Chain data stays in the store; the
    /// persisted pointer is removed in the background so the caller never
    /// waits on the network.
    pub async fn end_active_chain(&self) {
        let ended = {
            let mut active = self.active.lock().await;
            let ended = active.id.take();
            active.hydrated = true;
            active.recent_blocks.clear();

            let previous = active.pending_clear.take();
            let kv = self.kv.clone();
            let key = self.pointer_key.clone();
            let timeout = self.timeout;
            active.pending_clear = Some(tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                if bounded(timeout, "clear active chain pointer", kv.remove(&key))
                    .await
                    .is_err()
                {
                    tracing::warn!("Active chain pointer may be stale until next write");
                }
            }));
            ended
        };

        if let Some(chain_id) = ended {
            tracing::info!("Ended chain {}", chain_id);
            self.events.publish(EngineEvent::ChainEnded { chain_id });
        }
    }

    /// Ids of the most recently completed blocks in the active chain, oldest
    /// first.
    pub async fn recent_block_ids(&self) -> Vec<i64> {
        let mut active = self.active.lock().await;
        self.hydrate(&mut active).await;
        active.recent_blocks.iter().copied().collect()
    }

    /// Active chain id without creating one.
    pub async fn active_chain_id(&self) -> Option<ChainId> {
        let mut active = self.active.lock().await;
        self.hydrate(&mut active).await;
        active.id
    }

    /// True when no chain is active and no pointer write is in flight.
    /// A tracker busy resolving its chain is never idle.
    pub fn is_idle(&self) -> bool {
        match self.active.try_lock() {
            Ok(active) => {
                active.id.is_none()
                    && active
                        .pending_clear
                        .as_ref()
                        .map_or(true, |pending| pending.is_finished())
            }
            Err(_) => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn wait_for_pointer_clear(&self) {
        let pending = self.active.lock().await.pending_clear.take();
        if let Some(pending) = pending {
            let _ = pending.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryKeyValueStore, MemoryStore};
    use crate::domain::models::{Chain, ChainHistory};
    use async_trait::async_trait;

    /// Chain store whose calls never complete.
    struct StalledStore;

    #[async_trait]
    impl ChainStore for StalledStore {
        async fn create_chain(&self) -> anyhow::Result<Chain> {
            std::future::pending().await
        }

        async fn insert_embodiment_check(
            &self,
            _check: NewEmbodimentCheck,
        ) -> anyhow::Result<EmbodimentCheck> {
            std::future::pending().await
        }

        async fn insert_completed_block(
            &self,
            _completed: NewCompletedBlock,
        ) -> anyhow::Result<CompletedBlock> {
            std::future::pending().await
        }

        async fn fetch_chain_history(
            &self,
            _chain_id: ChainId,
        ) -> anyhow::Result<Option<ChainHistory>> {
            std::future::pending().await
        }
    }

    /// Key-value store that takes its time removing keys.
    #[derive(Default)]
    struct SlowRemoveKv {
        inner: MemoryKeyValueStore,
    }

    #[async_trait]
    impl KeyValueStore for SlowRemoveKv {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            self.inner.remove(key).await
        }
    }

    fn tracker(store: Arc<MemoryStore>, kv: Arc<MemoryKeyValueStore>) -> SessionTracker {
        SessionTracker::new(
            store,
            kv,
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(2),
            DEFAULT_RECENT_WINDOW,
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn test_same_chain_until_ended() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let tracker = tracker(store.clone(), kv.clone());

        let first = tracker.get_or_create_active_chain().await.unwrap();
        let second = tracker.get_or_create_active_chain().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            kv.get(ACTIVE_CHAIN_KEY).await.unwrap(),
            Some(first.to_string())
        );

        tracker.end_active_chain().await;
        tracker.wait_for_pointer_clear().await;
        assert_eq!(kv.get(ACTIVE_CHAIN_KEY).await.unwrap(), None);
        let third = tracker.get_or_create_active_chain().await.unwrap();
        assert_ne!(first, third);
        assert_eq!(store.chains_created(), 2);
        assert!(store.fetch_chain_history(first).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_creation_is_single_flight() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(tracker(store.clone(), Arc::new(MemoryKeyValueStore::new())));

        let calls = (0..10).map(|_| {
            let tracker = tracker.clone();
            async move { tracker.get_or_create_active_chain().await }
        });
        let ids = futures::future::join_all(calls).await;

        let first = ids[0].unwrap();
        assert!(ids.iter().all(|id| *id == Some(first)));
        assert_eq!(store.chains_created(), 1);
    }

    #[tokio::test]
    async fn test_resumes_persisted_pointer() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let id = tracker(store.clone(), kv.clone())
            .get_or_create_active_chain()
            .await
            .unwrap();

        let restarted = tracker(store.clone(), kv);
        assert_eq!(restarted.get_or_create_active_chain().await, Some(id));
        assert_eq!(store.chains_created(), 1);
    }

    #[tokio::test]
    async fn test_malformed_pointer_starts_new_chain() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(ACTIVE_CHAIN_KEY, "not-a-uuid").await.unwrap();

        let id = tracker(store.clone(), kv.clone())
            .get_or_create_active_chain()
            .await
            .unwrap();
        assert_eq!(kv.get(ACTIVE_CHAIN_KEY).await.unwrap(), Some(id.to_string()));
    }

    #[tokio::test]
    async fn test_completed_block_roundtrip_through_history() {
        let store = Arc::new(MemoryStore::with_blocks(crate::db::seed::demo_blocks()));
        let tracker = tracker(store.clone(), Arc::new(MemoryKeyValueStore::new()));

        let saved = tracker.save_completed_block(3, 125, 0).await.unwrap();
        let history = store
            .fetch_chain_history(saved.chain_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(history.completed_blocks.len(), 1);
        let read = &history.completed_blocks[0];
        assert_eq!(read.completed.block_id, 3);
        assert_eq!(read.completed.seconds_elapsed, 125);
        assert_eq!(read.completed.order_index, 0);
        assert_eq!(read.block.as_ref().map(|b| b.id), Some(3));
    }

    #[tokio::test]
    async fn test_check_derives_state_and_clamps() {
        let tracker = tracker(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKeyValueStore::new()),
        );
        let check = tracker.save_embodiment_check(130, None).await.unwrap();
        assert_eq!(check.slider_value, 100);
        assert_eq!(check.polyvagal_state, PolyvagalState::Connected);

        let explicit = tracker
            .save_embodiment_check(45, Some(PolyvagalState::Settling))
            .await
            .unwrap();
        assert_eq!(explicit.polyvagal_state, PolyvagalState::Settling);
        assert_eq!(explicit.chain_id, check.chain_id);
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_none() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), Arc::new(MemoryKeyValueStore::new()));

        store.set_failing(true);
        assert_eq!(tracker.get_or_create_active_chain().await, None);
        assert!(tracker.save_embodiment_check(50, None).await.is_none());
        assert!(tracker.save_completed_block(1, 30, 0).await.is_none());

        store.set_failing(false);
        let chain = tracker.get_or_create_active_chain().await.unwrap();
        store.set_failing(true);
        assert!(tracker.save_completed_block(1, 30, 0).await.is_none());
        assert_eq!(tracker.recent_block_ids().await, vec![1]);
        assert_eq!(tracker.active_chain_id().await, Some(chain));
    }

    #[tokio::test]
    async fn test_kv_failure_keeps_chain_in_memory() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set_failing(true);
        let tracker = tracker(store.clone(), kv);

        let id = tracker.get_or_create_active_chain().await.unwrap();
        assert_eq!(tracker.get_or_create_active_chain().await, Some(id));
        tracker.end_active_chain().await;
        assert_eq!(tracker.active_chain_id().await, None);
        assert_eq!(store.chains_created(), 1);
    }

    #[tokio::test]
    async fn test_recent_window_is_bounded() {
        let tracker = tracker(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKeyValueStore::new()),
        );
        for (idx, block_id) in [4, 5, 6].into_iter().enumerate() {
            tracker.save_completed_block(block_id, 60, idx as i32).await;
        }
        assert_eq!(tracker.recent_block_ids().await, vec![5, 6]);

        tracker.end_active_chain().await;
        assert!(tracker.recent_block_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_end_publishes_event() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let tracker = SessionTracker::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKeyValueStore::new()),
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(2),
            DEFAULT_RECENT_WINDOW,
            events,
        );

        let id = tracker.get_or_create_active_chain().await.unwrap();
        tracker.end_active_chain().await;
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::ChainStarted { chain_id: id });
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::ChainEnded { chain_id: id });
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_returns_before_pointer_is_removed() {
        let kv = Arc::new(SlowRemoveKv::default());
        let tracker = SessionTracker::new(
            Arc::new(MemoryStore::new()),
            kv.clone(),
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(4),
            DEFAULT_RECENT_WINDOW,
            EventBus::default(),
        );
        let id = tracker.get_or_create_active_chain().await.unwrap();

        let started = tokio::time::Instant::now();
        tracker.end_active_chain().await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(tracker.active_chain_id().await, None);

        tracker.wait_for_pointer_clear().await;
        assert_eq!(kv.inner.get(ACTIVE_CHAIN_KEY).await.unwrap(), None);
        assert_ne!(tracker.get_or_create_active_chain().await, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_pointer_survives_pending_removal() {
        let kv = Arc::new(SlowRemoveKv::default());
        let tracker = SessionTracker::new(
            Arc::new(MemoryStore::new()),
            kv.clone(),
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(4),
            DEFAULT_RECENT_WINDOW,
            EventBus::default(),
        );
        tracker.get_or_create_active_chain().await.unwrap();
        tracker.end_active_chain().await;
        let next = tracker.get_or_create_active_chain().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            kv.inner.get(ACTIVE_CHAIN_KEY).await.unwrap(),
            Some(next.to_string())
        );
    }

    #[tokio::test]
    async fn test_resumed_chain_remembers_recent_blocks() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let first = tracker(store.clone(), kv.clone());
        for (idx, block_id) in [7, 8, 9].into_iter().enumerate() {
            first.save_completed_block(block_id, 60, idx as i32).await.unwrap();
        }

        let resumed = tracker(store.clone(), kv);
        assert_eq!(resumed.recent_block_ids().await, vec![8, 9]);
        assert_eq!(
            resumed.get_or_create_active_chain().await,
            first.active_chain_id().await
        );
        assert_eq!(store.chains_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out_to_none() {
        let tracker = SessionTracker::new(
            Arc::new(StalledStore),
            Arc::new(MemoryKeyValueStore::new()),
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(2),
            DEFAULT_RECENT_WINDOW,
            EventBus::default(),
        );

        assert_eq!(tracker.get_or_create_active_chain().await, None);
        assert!(tracker.try_get_or_create_active_chain().await.is_err());
        assert!(tracker.save_embodiment_check(40, None).await.is_none());
        assert!(tracker.save_completed_block(1, 30, 0).await.is_none());
        assert_eq!(tracker.active_chain_id().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_resume_keeps_chain_without_history() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let id = Uuid::new_v4();
        kv.set(ACTIVE_CHAIN_KEY, &id.to_string()).await.unwrap();
        let tracker = SessionTracker::new(
            Arc::new(StalledStore),
            kv,
            ACTIVE_CHAIN_KEY,
            Duration::from_secs(2),
            DEFAULT_RECENT_WINDOW,
            EventBus::default(),
        );

        assert!(tracker.recent_block_ids().await.is_empty());
        assert_eq!(tracker.get_or_create_active_chain().await, Some(id));
    }

    #[tokio::test]
    async fn test_idle_only_without_chain() {
        let tracker = tracker(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKeyValueStore::new()),
        );
        assert!(tracker.is_idle());
        tracker.get_or_create_active_chain().await.unwrap();
        assert!(!tracker.is_idle());
        tracker.end_active_chain().await;
        tracker.wait_for_pointer_clear().await;
        assert!(tracker.is_idle());
    }
}
