//! Dead-letter envelopes.
//!
//! Messages that cannot be processed (malformed payloads) or delivered
//! (relay retries exhausted) are wrapped with the reason and time of failure
//! and published to a separate topic for manual inspection.

use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::message::{Delivery, StreamError};
use super::producer::StreamProducer;
use crate::clock::unix_millis;

/// Envelope written to the dead-letter topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition_key: String,
    /// Original payload bytes, base64-encoded so binary garbage survives.
    pub payload: String,
    pub reason: String,
    pub failed_at_ms: u64,
    /// Offset in the source partition, when the failure happened on the consumer side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl DeadLetter {
    pub fn new(
        source_topic: impl Into<String>,
        partition_key: impl Into<String>,
        payload: &[u8],
        reason: impl Into<String>,
        failed_at: SystemTime,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            partition_key: partition_key.into(),
            payload: STANDARD.encode(payload),
            reason: reason.into(),
            failed_at_ms: unix_millis(failed_at),
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Decode the original payload bytes.
    pub fn original_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.payload)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Publish this envelope to `topic`, keyed by the original partition key.
    pub fn publish<P: StreamProducer + ?Sized>(
        &self,
        producer: &P,
        topic: &str,
    ) -> Result<Delivery, StreamError> {
        let bytes = self
            .to_json()
            .map_err(|err| StreamError::Other(Box::new(err)))?;
        warn!(
            source_topic = %self.source_topic,
            key = %self.partition_key,
            reason = %self.reason,
            offset = ?self.offset,
            "dead-lettering message"
        );
        producer.publish(topic, &self.partition_key, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::InMemoryStream;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn keeps_original_bytes_and_reason() {
        let at = UNIX_EPOCH + Duration::from_millis(1234);
        let letter = DeadLetter::new("interactions", "post-1", &[0xff, 0x00, b'x'], "bad json", at)
            .with_offset(7);

        let decoded = DeadLetter::from_json(&letter.to_json().unwrap()).unwrap();
        assert_eq!(decoded.original_payload().unwrap(), vec![0xff, 0x00, b'x']);
        assert_eq!(decoded.reason, "bad json");
        assert_eq!(decoded.failed_at_ms, 1234);
        assert_eq!(decoded.offset, Some(7));
    }

    #[test]
    fn publish_routes_to_dead_letter_topic() {
        let stream = InMemoryStream::new(2);
        let letter = DeadLetter::new("interactions", "post-1", b"{", "truncated", SystemTime::now());

        letter.publish(&stream, "interactions.dlq").unwrap();

        assert_eq!(stream.len("interactions.dlq"), 1);
        assert!(stream.is_empty("interactions"));
    }
}
