use crate::clock::Clock;
use crate::config::AppConfig;
use crate::db::{CatalogSource, ChainStore, KeyValueStore};
use crate::domain::models::{ChainHistory, ChainId};
use crate::events::EventBus;
use crate::services::catalog::CatalogCache;
use crate::services::chain_tracker::{bounded, SessionTracker, ACTIVE_CHAIN_KEY};
use crate::services::selection::{SelectionConfig, SelectionEngine};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogCache>,
    pub engine: SelectionEngine,
    pub chains: Arc<dyn ChainStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub events: EventBus,
    pub network_timeout: std::time::Duration,
    pub recent_window: usize,
    pub trackers: Arc<RwLock<HashMap<String, Arc<SessionTracker>>>>, // device_id -> SessionTracker
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn CatalogSource>,
        chains: Arc<dyn ChainStore>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        let catalog = Arc::new(CatalogCache::new(
            source,
            clock,
            config.catalog_ttl,
            config.network_timeout,
            events.clone(),
        ));
        let engine = SelectionEngine::new(SelectionConfig {
            sos_canonical_name: config.sos_canonical_name.clone(),
            seed: config.selection_seed,
        });
        Self {
            catalog,
            engine,
            chains,
            kv,
            events,
            network_timeout: config.network_timeout,
            recent_window: config.recent_window,
            trackers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The tracker for a device, created on first use. Each device keeps its
    /// active chain pointer under its own key.
    pub async fn tracker_for(&self, device_id: &str) -> Arc<SessionTracker> {
        if let Some(tracker) = self.trackers.read().await.get(device_id) {
            return tracker.clone();
        }
        let mut trackers = self.trackers.write().await;
        trackers
            .entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionTracker::new(
                    self.chains.clone(),
                    self.kv.clone(),
                    format!("{}:{}", ACTIVE_CHAIN_KEY, device_id),
                    self.network_timeout,
                    self.recent_window,
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Drops trackers without an active chain. Trackers still held by a
    /// handler, or busy resolving their chain, are kept so a device never
    /// ends up with two trackers. Pointers stay in the key-value store and
    /// are picked up again on the next request.
    pub async fn drop_idle_trackers(&self) -> usize {
        let mut trackers = self.trackers.write().await;
        let before = trackers.len();
        trackers.retain(|_, tracker| Arc::strong_count(tracker) > 1 || !tracker.is_idle());
        before - trackers.len()
    }

    /// Full history of a chain by id.
    pub async fn chain_history(&self, chain_id: ChainId) -> Option<ChainHistory> {
        bounded(
            self.network_timeout,
            "load chain history",
            self.chains.fetch_chain_history(chain_id),
        )
        .await
        .ok()
        .flatten()
    }
}
