use std::error::Error as StdError;

use thiserror::Error;

use crate::interaction::DecodeError;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("invalid outbox event: {0}")]
    InvalidEvent(String),
    #[error("invalid interaction: {0}")]
    InvalidInteraction(#[from] DecodeError),
    #[error("failed to serialize outbox payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("outbox record {0} not found")]
    NotFound(u64),
    #[error("outbox lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("outbox storage error: {0}")]
    Storage(String),
    #[error("domain write failed: {0}")]
    DomainWrite(#[source] Box<dyn StdError + Send + Sync>),
}
