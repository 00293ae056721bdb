//! Error taxonomy for the dispatch core

use switchboard_memory::MemoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// Startup configuration (manifest, pattern table) is missing or unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One dataset source could not be loaded; callers recover with an empty entry
    #[error("Dataset load error for agent '{agent}' ({locator}): {reason}")]
    DatasetLoad {
        agent: String,
        locator: String,
        reason: String,
    },

    /// A caller supplied a request missing a required field
    #[error("{0}")]
    Validation(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Delivery to client {client} failed: {reason}")]
    Delivery { client: String, reason: String },

    #[error("Delegation error: {0}")]
    Delegation(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwitchboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
