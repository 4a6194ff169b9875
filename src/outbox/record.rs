use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::error::OutboxError;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Processed,
    /// Publish failed; the record is claimed again once its backoff elapses.
    Failed,
    /// Retries exhausted; the payload went to the dead-letter topic.
    DeadLettered,
}

impl OutboxStatus {
    /// Terminal records are never claimed again and are purged after retention.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Processed | OutboxStatus::DeadLettered)
    }
}

/// Durable event waiting to be relayed to the stream.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: u64,
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub created_at: SystemTime,
    /// Earliest time the relay may try this record again.
    pub available_at: SystemTime,
    pub processed_at: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn is_claimable(&self, now: SystemTime) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.available_at <= now,
            OutboxStatus::Processed | OutboxStatus::DeadLettered => false,
        }
    }
}

/// An event staged inside a unit of work, before it has an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    pub fn new(topic: impl Into<String>, partition_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: partition_key.into(),
            payload,
        }
    }

    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.topic.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("topic is empty".into()));
        }
        if self.partition_key.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("partition key is empty".into()));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: u64, now: SystemTime) -> OutboxRecord {
        OutboxRecord {
            id,
            topic: self.topic,
            partition_key: self.partition_key,
            payload: self.payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: now,
            available_at: now,
            processed_at: None,
            last_error: None,
        }
    }
}
