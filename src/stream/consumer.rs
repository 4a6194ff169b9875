//! Consumer side of the stream transport.

use std::time::Duration;

use super::message::{StreamError, StreamMessage};

/// A consumer bound to a single partition of a topic on behalf of a group.
///
/// This is a pull-based interface with manual offset management: nothing is
/// committed until [`commit`](PartitionConsumer::commit) is called, and a
/// consumer created after a crash resumes from the last committed offset.
pub trait PartitionConsumer: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> u32;

    /// Pull up to `max` messages, blocking until at least one is available or
    /// the timeout expires.
    fn poll_batch(&self, max: usize, timeout: Duration) -> Result<Vec<StreamMessage>, StreamError>;

    /// Signal liveness so the broker does not reassign the partition.
    fn heartbeat(&self) -> Result<(), StreamError>;

    /// Commit `next_offset` as the position to resume from.
    fn commit(&self, next_offset: u64) -> Result<(), StreamError>;

    /// The last committed position, if any.
    fn committed(&self) -> Result<Option<u64>, StreamError>;

    /// Move the read position back to the last committed offset so
    /// uncommitted messages are delivered again.
    fn rewind(&self) -> Result<(), StreamError>;

    /// Give up ownership of the partition.
    fn release(&self) -> Result<(), StreamError>;
}

/// A stream that hands out partition consumers (the group-membership side of
/// the transport).
pub trait PartitionedStream: Send + Sync {
    type Consumer: PartitionConsumer + 'static;

    /// Number of partitions of `topic`.
    fn partition_count(&self, topic: &str) -> u32;

    /// Take ownership of one partition for `group`.
    fn subscribe(&self, group: &str, topic: &str, partition: u32) -> Result<Self::Consumer, StreamError>;
}
