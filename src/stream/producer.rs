//! Producer side of the stream transport.

use super::message::{Delivery, StreamError};

/// Trait for publishing keyed messages to a partitioned stream.
///
/// Messages sharing a key always land in the same partition, in publish
/// order. Implementations might include:
/// - `InMemoryStream` - For testing and single-process scenarios
/// - A Kafka producer with an idempotent, single in-flight configuration
pub trait StreamProducer: Send + Sync {
    /// Publish a single message and wait for the broker's acknowledgment.
    fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, StreamError>;
}

impl<P: StreamProducer + ?Sized> StreamProducer for std::sync::Arc<P> {
    fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, StreamError> {
        (**self).publish(topic, key, payload)
    }
}
