pub mod memory;
pub mod seed;

use crate::domain::models::{
    Block, Chain, ChainHistory, ChainId, CompletedBlock, CompletedBlockDetail, EmbodimentCheck,
    MediaType, NewCompletedBlock, NewEmbodimentCheck,
};
use crate::domain::polyvagal::{score_to_state, PolyvagalState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

/// Where the catalog comes from. Only active blocks are returned.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_active_blocks(&self) -> Result<Vec<Block>>;
}

/// Append-only storage for chains and their events.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn create_chain(&self) -> Result<Chain>;
    async fn insert_embodiment_check(&self, check: NewEmbodimentCheck) -> Result<EmbodimentCheck>;
    async fn insert_completed_block(&self, completed: NewCompletedBlock) -> Result<CompletedBlock>;
    async fn fetch_chain_history(&self, chain_id: ChainId) -> Result<Option<ChainHistory>>;
}

/// Small string store for device-local pointers such as the active chain id.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, FromRow)]
pub struct BlockRow {
    pub id: i64,
    pub canonical_name: String,
    pub display_name: String,
    pub media_url: Option<String>,
    pub media_type: String,
    pub state_target: Option<String>,
    pub intensity: Option<i16>,
    pub active: bool,
    pub is_routine_only: bool,
}

impl BlockRow {
    /// Rows with an unknown media type are dropped; an unknown state target
    /// is treated as untargeted.
    pub fn into_block(self) -> Option<Block> {
        let Ok(media_type) = MediaType::try_from(self.media_type.as_str()) else {
            tracing::warn!(
                "Skipping block {} ({}): unknown media type '{}'",
                self.id,
                self.canonical_name,
                self.media_type
            );
            return None;
        };
        let state_target = match self.state_target.as_deref() {
            Some(raw) => match PolyvagalState::try_from(raw) {
                Ok(state) => Some(state),
                Err(()) => {
                    tracing::warn!("Block {} has unknown state target '{}'", self.id, raw);
                    None
                }
            },
            None => None,
        };
        Some(Block {
            id: self.id,
            canonical_name: self.canonical_name,
            display_name: self.display_name,
            media_url: self.media_url,
            media_type,
            state_target,
            intensity: self.intensity,
            active: self.active,
            is_routine_only: self.is_routine_only,
        })
    }
}

#[derive(Debug, FromRow)]
struct EmbodimentCheckRow {
    id: Uuid,
    chain_id: Uuid,
    slider_value: i32,
    polyvagal_state: String,
    created_at: DateTime<Utc>,
}

impl From<EmbodimentCheckRow> for EmbodimentCheck {
    fn from(row: EmbodimentCheckRow) -> Self {
        let polyvagal_state = PolyvagalState::try_from(row.polyvagal_state.as_str())
            .unwrap_or_else(|_| score_to_state(row.slider_value));
        EmbodimentCheck {
            id: row.id,
            chain_id: row.chain_id,
            slider_value: row.slider_value,
            polyvagal_state,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CompletedBlockRow {
    id: Uuid,
    chain_id: Uuid,
    block_id: i64,
    seconds_elapsed: i32,
    order_index: i32,
    created_at: DateTime<Utc>,
}

impl From<CompletedBlockRow> for CompletedBlock {
    fn from(row: CompletedBlockRow) -> Self {
        CompletedBlock {
            id: row.id,
            chain_id: row.chain_id,
            block_id: row.block_id,
            seconds_elapsed: row.seconds_elapsed,
            order_index: row.order_index,
            created_at: row.created_at,
        }
    }
}

/// Joins completed blocks with their catalog entries. Events are ordered by
/// position in the chain, then by write time.
pub fn assemble_history(
    chain: Chain,
    mut checks: Vec<EmbodimentCheck>,
    mut completed: Vec<CompletedBlock>,
    blocks: Vec<Block>,
) -> ChainHistory {
    checks.sort_by_key(|c| c.created_at);
    completed.sort_by_key(|c| (c.order_index, c.created_at));
    let by_id: HashMap<i64, Block> = blocks.into_iter().map(|b| (b.id, b)).collect();
    let completed_blocks = completed
        .into_iter()
        .map(|completed| CompletedBlockDetail {
            block: by_id.get(&completed.block_id).cloned(),
            completed,
        })
        .collect();
    ChainHistory {
        chain,
        checks,
        completed_blocks,
    }
}

const BLOCK_COLUMNS: &str = r#"
    id,
    canonical_name,
    display_name,
    media_url,
    media_type,
    state_target,
    intensity,
    active,
    is_routine_only
"#;

pub async fn fetch_active_blocks(pool: &PgPool) -> Result<Vec<Block>> {
    let rows = sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM somi_blocks WHERE active = true ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(BlockRow::into_block).collect())
}

/// Batch lookup for history joins. Inactive blocks are included so old
/// chains still resolve.
pub async fn find_blocks_by_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<Block>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM somi_blocks WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(BlockRow::into_block).collect())
}

pub async fn insert_chain(pool: &PgPool) -> Result<Chain> {
    let id = Uuid::new_v4();
    let created_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO somi_chains (id)
        VALUES ($1)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(Chain { id, created_at })
}

pub async fn find_chain(pool: &PgPool, chain_id: ChainId) -> Result<Option<Chain>> {
    let row: Option<(Uuid, DateTime<Utc>)> =
        sqlx::query_as("SELECT id, created_at FROM somi_chains WHERE id = $1")
            .bind(chain_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id, created_at)| Chain { id, created_at }))
}

pub async fn insert_embodiment_check(
    pool: &PgPool,
    check: &NewEmbodimentCheck,
) -> Result<EmbodimentCheck> {
    let row = sqlx::query_as::<_, EmbodimentCheckRow>(
        r#"
        INSERT INTO embodiment_checks (id, chain_id, slider_value, polyvagal_state)
        VALUES ($1, $2, $3, $4)
        RETURNING id, chain_id, slider_value, polyvagal_state, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(check.chain_id)
    .bind(check.slider_value)
    .bind(check.polyvagal_state.as_str())
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub async fn insert_completed_block(
    pool: &PgPool,
    completed: &NewCompletedBlock,
) -> Result<CompletedBlock> {
    let row = sqlx::query_as::<_, CompletedBlockRow>(
        r#"
        INSERT INTO completed_somi_blocks (id, chain_id, block_id, seconds_elapsed, order_index)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, chain_id, block_id, seconds_elapsed, order_index, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(completed.chain_id)
    .bind(completed.block_id)
    .bind(completed.seconds_elapsed)
    .bind(completed.order_index)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub async fn fetch_chain_history(pool: &PgPool, chain_id: ChainId) -> Result<Option<ChainHistory>> {
    let Some(chain) = find_chain(pool, chain_id).await? else {
        return Ok(None);
    };

    let checks = sqlx::query_as::<_, EmbodimentCheckRow>(
        r#"
        SELECT id, chain_id, slider_value, polyvagal_state, created_at
        FROM embodiment_checks
        WHERE chain_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(chain_id)
    .fetch_all(pool)
    .await?;

    let completed = sqlx::query_as::<_, CompletedBlockRow>(
        r#"
        SELECT id, chain_id, block_id, seconds_elapsed, order_index, created_at
        FROM completed_somi_blocks
        WHERE chain_id = $1
        ORDER BY order_index ASC, created_at ASC
        "#,
    )
    .bind(chain_id)
    .fetch_all(pool)
    .await?;

    let mut block_ids: Vec<i64> = completed.iter().map(|c| c.block_id).collect();
    block_ids.sort_unstable();
    block_ids.dedup();
    let blocks = find_blocks_by_ids(pool, &block_ids).await?;

    Ok(Some(assemble_history(
        chain,
        checks.into_iter().map(Into::into).collect(),
        completed.into_iter().map(Into::into).collect(),
        blocks,
    )))
}

pub async fn get_device_value(pool: &PgPool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM device_state WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_device_value(pool: &PgPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO device_state (key, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_device_value(pool: &PgPool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM device_state WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogSource for PgStore {
    async fn fetch_active_blocks(&self) -> Result<Vec<Block>> {
        fetch_active_blocks(&self.pool).await
    }
}

#[async_trait]
impl ChainStore for PgStore {
    async fn create_chain(&self) -> Result<Chain> {
        insert_chain(&self.pool).await
    }

    async fn insert_embodiment_check(&self, check: NewEmbodimentCheck) -> Result<EmbodimentCheck> {
        insert_embodiment_check(&self.pool, &check).await
    }

    async fn insert_completed_block(&self, completed: NewCompletedBlock) -> Result<CompletedBlock> {
        insert_completed_block(&self.pool, &completed).await
    }

    async fn fetch_chain_history(&self, chain_id: ChainId) -> Result<Option<ChainHistory>> {
        fetch_chain_history(&self.pool, chain_id).await
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        get_device_value(&self.pool, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        set_device_value(&self.pool, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        remove_device_value(&self.pool, key).await
    }
}
