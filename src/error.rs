use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no content available")]
    NoContentAvailable,
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(String),
    #[error("routine '{routine_type}' has no configuration for {block_count} blocks")]
    ConfigurationMissing {
        routine_type: String,
        block_count: usize,
    },
}

impl EngineError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        EngineError::BackingStoreUnavailable(err.to_string())
    }
}
