//! In-memory partitioned log for testing and single-process scenarios.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use super::consumer::{PartitionConsumer, PartitionedStream};
use super::message::{Delivery, StreamError, StreamMessage};
use super::producer::StreamProducer;

type GroupPartition = (String, String, u32);

struct Shared {
    partitions: u32,
    log: RwLock<HashMap<String, Vec<Vec<StreamMessage>>>>,
    committed: Mutex<HashMap<GroupPartition, u64>>,
    owners: Mutex<HashMap<GroupPartition, u64>>,
    heartbeats: Mutex<HashMap<GroupPartition, u64>>,
    next_member: AtomicU64,
}

/// In-memory partitioned stream.
///
/// Features:
/// - Thread-safe (clones share the same log)
/// - Every topic has the same fixed number of partitions, created on first use
/// - Messages are routed by hashing their key, so one key stays in one partition
/// - Committed offsets are tracked per consumer group, and a partition can be
///   owned by at most one consumer of a group at a time
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use interaction_pipeline::stream::{InMemoryStream, PartitionConsumer, PartitionedStream, StreamProducer};
///
/// let stream = InMemoryStream::new(2);
/// let delivery = stream.publish("interactions", "post-1", b"{}".to_vec()).unwrap();
///
/// let consumer = stream.subscribe("workers", "interactions", delivery.partition).unwrap();
/// let batch = consumer.poll_batch(10, Duration::from_millis(10)).unwrap();
/// assert_eq!(batch.len(), 1);
/// consumer.commit(batch[0].next_offset()).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryStream {
    shared: Arc<Shared>,
}

impl Default for InMemoryStream {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryStream {
    /// Create a stream whose topics have `partitions` partitions each.
    pub fn new(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                log: RwLock::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                owners: Mutex::new(HashMap::new()),
                heartbeats: Mutex::new(HashMap::new()),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.shared.partitions)) as u32
    }

    /// All messages of a topic, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<StreamMessage> {
        let log = self.shared.log.read().unwrap_or_else(|p| p.into_inner());
        log.get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages of a single partition, in offset order.
    pub fn partition_messages(&self, topic: &str, partition: u32) -> Vec<StreamMessage> {
        let log = self.shared.log.read().unwrap_or_else(|p| p.into_inner());
        log.get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of messages in a topic.
    pub fn len(&self, topic: &str) -> usize {
        let log = self.shared.log.read().unwrap_or_else(|p| p.into_inner());
        log.get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Committed offset of a group on one partition.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        let committed = self.shared.committed.lock().unwrap_or_else(|p| p.into_inner());
        committed.get(&key(group, topic, partition)).copied()
    }

    /// Number of heartbeats a group has sent for one partition.
    pub fn heartbeats(&self, group: &str, topic: &str, partition: u32) -> u64 {
        let heartbeats = self.shared.heartbeats.lock().unwrap_or_else(|p| p.into_inner());
        heartbeats.get(&key(group, topic, partition)).copied().unwrap_or(0)
    }

    /// Whether some consumer of `group` currently owns the partition.
    pub fn is_owned(&self, group: &str, topic: &str, partition: u32) -> bool {
        let owners = self.shared.owners.lock().unwrap_or_else(|p| p.into_inner());
        owners.contains_key(&key(group, topic, partition))
    }
}

fn key(group: &str, topic: &str, partition: u32) -> GroupPartition {
    (group.to_string(), topic.to_string(), partition)
}

impl StreamProducer for InMemoryStream {
    fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, StreamError> {
        let partition = self.partition_for(key);
        let mut log = self
            .shared
            .log
            .write()
            .map_err(|_| StreamError::LockPoisoned("publish"))?;
        let partitions = log
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.shared.partitions as usize]);
        let messages = &mut partitions[partition as usize];
        let offset = messages.len() as u64;
        messages.push(StreamMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
        });
        Ok(Delivery { partition, offset })
    }
}

impl PartitionedStream for InMemoryStream {
    type Consumer = InMemoryPartitionConsumer;

    fn partition_count(&self, _topic: &str) -> u32 {
        self.shared.partitions
    }

    fn subscribe(&self, group: &str, topic: &str, partition: u32) -> Result<Self::Consumer, StreamError> {
        if partition >= self.shared.partitions {
            return Err(StreamError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let slot = key(group, topic, partition);
        let member = self.shared.next_member.fetch_add(1, Ordering::Relaxed);
        {
            let mut owners = self
                .shared
                .owners
                .lock()
                .map_err(|_| StreamError::LockPoisoned("subscribe"))?;
            if owners.contains_key(&slot) {
                return Err(StreamError::PartitionOwned {
                    topic: topic.to_string(),
                    partition,
                });
            }
            owners.insert(slot.clone(), member);
        }

        let start = {
            let committed = self
                .shared
                .committed
                .lock()
                .map_err(|_| StreamError::LockPoisoned("subscribe"))?;
            committed.get(&slot).copied().unwrap_or(0)
        };
        debug!(group, topic, partition, start, "partition assigned");

        Ok(InMemoryPartitionConsumer {
            shared: Arc::clone(&self.shared),
            slot,
            member,
            position: Mutex::new(start),
            released: AtomicBool::new(false),
        })
    }
}

/// A group member's handle on one partition of an [`InMemoryStream`].
///
/// Dropping the handle gives up ownership without committing, which is how a
/// crashed worker looks to the rest of the group.
pub struct InMemoryPartitionConsumer {
    shared: Arc<Shared>,
    slot: GroupPartition,
    member: u64,
    position: Mutex<u64>,
    released: AtomicBool,
}

impl InMemoryPartitionConsumer {
    /// Current read position (next offset to be returned by a poll).
    pub fn position(&self) -> u64 {
        *self.position.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn ensure_owner(&self) -> Result<(), StreamError> {
        let owners = self
            .shared
            .owners
            .lock()
            .map_err(|_| StreamError::LockPoisoned("ownership check"))?;
        match owners.get(&self.slot) {
            Some(member) if *member == self.member => Ok(()),
            _ => Err(StreamError::PartitionOwned {
                topic: self.slot.1.clone(),
                partition: self.slot.2,
            }),
        }
    }

    fn give_up_ownership(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut owners = self.shared.owners.lock().unwrap_or_else(|p| p.into_inner());
        if owners.get(&self.slot) == Some(&self.member) {
            owners.remove(&self.slot);
        }
    }
}

impl PartitionConsumer for InMemoryPartitionConsumer {
    fn topic(&self) -> &str {
        &self.slot.1
    }

    fn partition(&self) -> u32 {
        self.slot.2
    }

    fn poll_batch(&self, max: usize, timeout: Duration) -> Result<Vec<StreamMessage>, StreamError> {
        self.ensure_owner()?;
        let deadline = Instant::now() + timeout;

        loop {
            {
                let log = self
                    .shared
                    .log
                    .read()
                    .map_err(|_| StreamError::LockPoisoned("poll"))?;
                let mut position = self
                    .position
                    .lock()
                    .map_err(|_| StreamError::LockPoisoned("poll"))?;

                if let Some(messages) = log
                    .get(self.topic())
                    .and_then(|partitions| partitions.get(self.partition() as usize))
                {
                    let start = (*position as usize).min(messages.len());
                    let end = start.saturating_add(max).min(messages.len());
                    if end > start {
                        *position = end as u64;
                        return Ok(messages[start..end].to_vec());
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn heartbeat(&self) -> Result<(), StreamError> {
        self.ensure_owner()?;
        let mut heartbeats = self
            .shared
            .heartbeats
            .lock()
            .map_err(|_| StreamError::LockPoisoned("heartbeat"))?;
        *heartbeats.entry(self.slot.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn commit(&self, next_offset: u64) -> Result<(), StreamError> {
        self.ensure_owner()?;
        let mut committed = self
            .shared
            .committed
            .lock()
            .map_err(|_| StreamError::LockPoisoned("commit"))?;
        committed.insert(self.slot.clone(), next_offset);
        Ok(())
    }

    fn committed(&self) -> Result<Option<u64>, StreamError> {
        let committed = self
            .shared
            .committed
            .lock()
            .map_err(|_| StreamError::LockPoisoned("committed"))?;
        Ok(committed.get(&self.slot).copied())
    }

    fn rewind(&self) -> Result<(), StreamError> {
        let committed = self.committed()?.unwrap_or(0);
        let mut position = self
            .position
            .lock()
            .map_err(|_| StreamError::LockPoisoned("rewind"))?;
        *position = committed;
        Ok(())
    }

    fn release(&self) -> Result<(), StreamError> {
        self.give_up_ownership();
        debug!(
            group = %self.slot.0,
            topic = %self.slot.1,
            partition = self.slot.2,
            "partition released"
        );
        Ok(())
    }
}

impl Drop for InMemoryPartitionConsumer {
    fn drop(&mut self) {
        self.give_up_ownership();
    }
}
