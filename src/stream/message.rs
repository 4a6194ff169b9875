//! Messages and errors shared by every stream transport.

use std::error::Error;

use thiserror::Error;

/// A message as stored in (and read back from) one partition of a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    pub topic: String,
    pub partition: u32,
    /// Position of this message within its partition.
    pub offset: u64,
    /// Partition key (the content id for interaction events).
    pub key: String,
    /// Serialized payload (JSON for interactions and dead letters).
    pub payload: Vec<u8>,
}

impl StreamMessage {
    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Offset a consumer commits after processing this message.
    pub fn next_offset(&self) -> u64 {
        self.offset + 1
    }
}

/// Where a published message landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
}

/// Error type for stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker rejected the message
    #[error("message rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("stream operation timed out")]
    Timeout,
    /// Another consumer in the group owns the partition
    #[error("partition {topic}/{partition} is owned by another consumer")]
    PartitionOwned { topic: String, partition: u32 },
    #[error("partition {topic}/{partition} does not exist")]
    UnknownPartition { topic: String, partition: u32 },
    #[error("stream lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("stream error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

impl StreamError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionFailed(_) | StreamError::Timeout | StreamError::Other(_)
        )
    }
}
