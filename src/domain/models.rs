use crate::domain::polyvagal::PolyvagalState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ChainId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

impl TryFrom<&str> for MediaType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "video" => Ok(MediaType::Video),
            "audio" => Ok(MediaType::Audio),
            _ => Err(()),
        }
    }
}

/// A single practice asset. Blocks are managed on the content side; the
/// engine only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub id: i64,
    pub canonical_name: String,
    pub display_name: String,
    pub media_url: Option<String>,
    pub media_type: MediaType,
    pub state_target: Option<PolyvagalState>,
    pub intensity: Option<i16>,
    pub active: bool,
    pub is_routine_only: bool,
}

impl Block {
    pub fn is_playable(&self) -> bool {
        self.active
            && self
                .media_url
                .as_deref()
                .map(|url| !url.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    pub id: ChainId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbodimentCheck {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub slider_value: i32,
    pub polyvagal_state: PolyvagalState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedBlock {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub block_id: i64,
    pub seconds_elapsed: i32,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmbodimentCheck {
    pub chain_id: ChainId,
    pub slider_value: i32,
    pub polyvagal_state: PolyvagalState,
}

#[derive(Debug, Clone)]
pub struct NewCompletedBlock {
    pub chain_id: ChainId,
    pub block_id: i64,
    pub seconds_elapsed: i32,
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedBlockDetail {
    #[serde(flatten)]
    pub completed: CompletedBlock,
    pub block: Option<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainHistory {
    pub chain: Chain,
    pub checks: Vec<EmbodimentCheck>,
    pub completed_blocks: Vec<CompletedBlockDetail>,
}
