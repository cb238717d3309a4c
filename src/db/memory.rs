use crate::db::{assemble_history, CatalogSource, ChainStore, KeyValueStore};
use crate::domain::models::{
    Block, Chain, ChainHistory, ChainId, CompletedBlock, EmbodimentCheck, NewCompletedBlock,
    NewEmbodimentCheck,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    blocks: Vec<Block>,
    chains: HashMap<ChainId, Chain>,
    checks: Vec<EmbodimentCheck>,
    completed: Vec<CompletedBlock>,
}

/// In-process store used when no database is configured, and as the fake in
/// tests. `set_failing(true)` makes every call error like an unreachable
/// backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing: AtomicBool,
    catalog_fetches: AtomicUsize,
    chains_created: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                blocks,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn replace_blocks(&self, blocks: Vec<Block>) {
        self.tables.write().await.blocks = blocks;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }

    pub fn chains_created(&self) -> usize {
        self.chains_created.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store is marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn fetch_active_blocks(&self) -> Result<Vec<Block>> {
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up so coalescing is observable.
        tokio::task::yield_now().await;
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables.blocks.iter().filter(|b| b.active).cloned().collect())
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn create_chain(&self) -> Result<Chain> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let chain = Chain {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        self.tables.write().await.chains.insert(chain.id, chain.clone());
        self.chains_created.fetch_add(1, Ordering::SeqCst);
        Ok(chain)
    }

    async fn insert_embodiment_check(&self, check: NewEmbodimentCheck) -> Result<EmbodimentCheck> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if !tables.chains.contains_key(&check.chain_id) {
            return Err(anyhow!("chain {} does not exist", check.chain_id));
        }
        let stored = EmbodimentCheck {
            id: Uuid::new_v4(),
            chain_id: check.chain_id,
            slider_value: check.slider_value,
            polyvagal_state: check.polyvagal_state,
            created_at: Utc::now(),
        };
        tables.checks.push(stored.clone());
        Ok(stored)
    }

    async fn insert_completed_block(&self, completed: NewCompletedBlock) -> Result<CompletedBlock> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if !tables.chains.contains_key(&completed.chain_id) {
            return Err(anyhow!("chain {} does not exist", completed.chain_id));
        }
        let stored = CompletedBlock {
            id: Uuid::new_v4(),
            chain_id: completed.chain_id,
            block_id: completed.block_id,
            seconds_elapsed: completed.seconds_elapsed,
            order_index: completed.order_index,
            created_at: Utc::now(),
        };
        tables.completed.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_chain_history(&self, chain_id: ChainId) -> Result<Option<ChainHistory>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let Some(chain) = tables.chains.get(&chain_id).cloned() else {
            return Ok(None);
        };
        let checks = tables
            .checks
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .cloned()
            .collect();
        let completed: Vec<CompletedBlock> = tables
            .completed
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .cloned()
            .collect();
        let blocks = tables
            .blocks
            .iter()
            .filter(|b| completed.iter().any(|c| c.block_id == b.id))
            .cloned()
            .collect();
        Ok(Some(assemble_history(chain, checks, completed, blocks)))
    }
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("key-value store is marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.values.write().await.remove(key);
        Ok(())
    }
}
