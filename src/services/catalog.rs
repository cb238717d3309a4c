use crate::clock::Clock;
use crate::db::CatalogSource;
use crate::domain::models::Block;
use crate::events::{EngineEvent, EventBus};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Default)]
struct CacheState {
    blocks: Option<Vec<Block>>,
    fetched_at: Option<DateTime<Utc>>,
    generation: u64,
}

/// Active-block catalog with a freshness window.
///
/// The state mutex is held across the refill, so callers that arrive during
/// a miss wait for the in-flight fetch and then read its result instead of
/// fetching again. A failed fetch serves the previous catalog (or an empty
/// one) and leaves the entry stale, so the next call retries.
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    fetch_timeout: std::time::Duration,
    events: EventBus,
    state: Mutex<CacheState>,
}

impl CatalogCache {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        fetch_timeout: std::time::Duration,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            clock,
            ttl,
            fetch_timeout,
            events,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn get_catalog(&self) -> Vec<Block> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if let (Some(blocks), Some(fetched_at)) = (&state.blocks, state.fetched_at) {
            if now - fetched_at < self.ttl {
                tracing::debug!("Catalog cache hit (generation {})", state.generation);
                return blocks.clone();
            }
        }

        match tokio::time::timeout(self.fetch_timeout, self.source.fetch_active_blocks()).await {
            Ok(Ok(blocks)) => {
                state.generation += 1;
                state.fetched_at = Some(self.clock.now());
                state.blocks = Some(blocks.clone());
                tracing::info!(
                    "Catalog refreshed: {} blocks (generation {})",
                    blocks.len(),
                    state.generation
                );
                self.events
                    .publish(EngineEvent::CatalogRefreshed { blocks: blocks.len() });
                blocks
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to fetch catalog: {}", e);
                self.serve_stale(&state)
            }
            Err(_) => {
                tracing::error!("Catalog fetch timed out after {:?}", self.fetch_timeout);
                self.serve_stale(&state)
            }
        }
    }

    fn serve_stale(&self, state: &CacheState) -> Vec<Block> {
        let served_stale = state.blocks.is_some();
        self.events
            .publish(EngineEvent::CatalogFetchFailed { served_stale });
        match &state.blocks {
            Some(blocks) => {
                tracing::warn!("Serving stale catalog ({} blocks)", blocks.len());
                blocks.clone()
            }
            None => Vec::new(),
        }
    }

    /// Marks the cached catalog stale without dropping it.
    pub async fn invalidate(&self) {
        self.state.lock().await.fetched_at = None;
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }
}
