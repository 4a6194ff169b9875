use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::error::OutboxError;
use super::record::OutboxRecord;
use super::store::OutboxStore;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::stream::{DeadLetter, StreamError, StreamProducer};

/// Result of one relay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub claimed: usize,
    pub published: usize,
    /// Publish failed; the record will be retried after its backoff.
    pub failed: usize,
    pub dead_lettered: usize,
    /// Left untouched because an earlier record with the same key failed.
    pub skipped: usize,
}

/// Bridge between the outbox table and the stream.
///
/// Each pass claims a batch, publishes record by record, and marks each one
/// processed, failed (with backoff) or dead-lettered. A crash between publish
/// and mark republishes the record on the next pass; consumers tolerate the
/// duplicate.
pub struct Relay<S, P> {
    store: S,
    producer: P,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    dead_letter_topic: String,
    retention: Duration,
}

impl<S, P> Relay<S, P> {
    /// Create a relay with default settings.
    pub fn new(store: S, producer: P) -> Self {
        Self::from_config(store, producer, &RelayConfig::default(), crate::config::DEFAULT_DEAD_LETTER_TOPIC)
    }

    pub fn from_config(store: S, producer: P, config: &RelayConfig, dead_letter_topic: &str) -> Self {
        Self {
            store,
            producer,
            clock: Arc::new(SystemClock),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            dead_letter_topic: dead_letter_topic.to_string(),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the batch size (max records claimed per pass).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the number of failed attempts after which a record is dead-lettered.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = topic.into();
        self
    }

    /// How long terminal records are kept before being purged.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

impl<S: OutboxStore, P: StreamProducer> Relay<S, P> {
    /// Claim one batch and try to publish every record in it.
    pub fn run_once(&self) -> Result<RelayReport, OutboxError> {
        let batch = self.store.claim_batch(self.batch_size, self.clock.now())?;
        let mut report = RelayReport {
            claimed: batch.len(),
            ..Default::default()
        };
        let mut stalled: HashSet<String> = HashSet::new();

        for record in batch {
            if stalled.contains(&record.partition_key) {
                report.skipped += 1;
                continue;
            }

            match self
                .producer
                .publish(&record.topic, &record.partition_key, record.payload.clone())
            {
                Ok(delivery) => {
                    self.store.mark_processed(record.id, self.clock.now())?;
                    report.published += 1;
                    debug!(
                        id = record.id,
                        topic = %record.topic,
                        key = %record.partition_key,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "outbox record relayed"
                    );
                }
                Err(err) => {
                    stalled.insert(record.partition_key.clone());
                    self.handle_failure(&record, &err, &mut report)?;
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "relay pass finished"
            );
        }
        Ok(report)
    }

    fn handle_failure(
        &self,
        record: &OutboxRecord,
        err: &StreamError,
        report: &mut RelayReport,
    ) -> Result<(), OutboxError> {
        let now = self.clock.now();
        let attempts = record.retry_count.saturating_add(1);
        let reason = err.to_string();

        // A broker rejection will not go away on retry.
        if attempts < self.max_retries && err.is_transient() {
            let retry_at = now + self.backoff(attempts);
            self.store.mark_failed(record.id, &reason, retry_at)?;
            report.failed += 1;
            warn!(id = record.id, attempts, error = %reason, "publish failed, will retry");
            return Ok(());
        }

        let letter = DeadLetter::new(
            record.topic.as_str(),
            record.partition_key.as_str(),
            &record.payload,
            format!("relay gave up after {attempts} attempts: {reason}"),
            now,
        );
        match letter.publish(&self.producer, &self.dead_letter_topic) {
            Ok(_) => {
                self.store.mark_dead_lettered(record.id, &reason, now)?;
                report.dead_lettered += 1;
                error!(id = record.id, attempts, error = %reason, "outbox record dead-lettered");
            }
            Err(dlq_err) => {
                let retry_at = now + self.backoff(attempts);
                let reason = format!("{reason}; dead-letter publish failed: {dlq_err}");
                self.store.mark_failed(record.id, &reason, retry_at)?;
                report.failed += 1;
                error!(id = record.id, attempts, error = %reason, "could not dead-letter record, will retry");
            }
        }
        Ok(())
    }

    /// Delete terminal records older than the retention period.
    pub fn purge(&self) -> Result<usize, OutboxError> {
        let Some(cutoff) = self.clock.now().checked_sub(self.retention) else {
            return Ok(0);
        };
        let purged = self.store.purge_terminal(cutoff)?;
        if purged > 0 {
            info!(purged, "purged relayed outbox records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::outbox::{InMemoryOutboxStore, NewOutboxEvent, OutboxStatus};
    use crate::stream::{Delivery, InMemoryStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOPIC: &str = "interactions.events";
    const DLQ: &str = "interactions.events.dlq";

    /// Fails the first `failures` publishes to the main topic.
    struct FlakyProducer {
        inner: InMemoryStream,
        failures: AtomicUsize,
    }

    impl StreamProducer for FlakyProducer {
        fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, StreamError> {
            if topic == TOPIC
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StreamError::ConnectionFailed("broker unavailable".into()));
            }
            self.inner.publish(topic, key, payload)
        }
    }

    fn setup(failures: usize) -> (Relay<InMemoryOutboxStore, FlakyProducer>, InMemoryStream, ManualClock) {
        let clock = ManualClock::default();
        let store = InMemoryOutboxStore::with_clock(Arc::new(clock.clone()));
        let stream = InMemoryStream::new(2);
        let producer = FlakyProducer {
            inner: stream.clone(),
            failures: AtomicUsize::new(failures),
        };
        let relay = Relay::new(store, producer)
            .with_clock(Arc::new(clock.clone()))
            .with_max_retries(3)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(10))
            .with_dead_letter_topic(DLQ);
        (relay, stream, clock)
    }

    fn append(relay: &Relay<InMemoryOutboxStore, FlakyProducer>, key: &str, payload: &[u8]) -> u64 {
        let mut uow = relay.store().begin();
        uow.append(NewOutboxEvent::new(TOPIC, key, payload.to_vec())).unwrap();
        uow.commit().unwrap()[0]
    }

    #[test]
    fn relay_builder() {
        let relay = Relay::new(InMemoryOutboxStore::new(), InMemoryStream::new(1))
            .with_batch_size(5)
            .with_max_retries(2)
            .with_retention(Duration::from_secs(30));

        assert_eq!(relay.batch_size, 5);
        assert_eq!(relay.max_retries, 2);
        assert_eq!(relay.retention, Duration::from_secs(30));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let (relay, _, _) = setup(0);
        assert_eq!(relay.backoff(1), Duration::from_secs(1));
        assert_eq!(relay.backoff(2), Duration::from_secs(2));
        assert_eq!(relay.backoff(3), Duration::from_secs(4));
        assert_eq!(relay.backoff(10), Duration::from_secs(10));
    }

    #[test]
    fn successful_publish_marks_processed() {
        let (relay, stream, _) = setup(0);
        let id = append(&relay, "a", b"{}");

        let report = relay.run_once().unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(stream.len(TOPIC), 1);
        let record = relay.store().get(id).unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Processed);
        assert!(record.processed_at.is_some());
    }

    #[test]
    fn failure_skips_later_records_with_same_key() {
        let (relay, stream, clock) = setup(1);
        let first = append(&relay, "a", b"1");
        append(&relay, "a", b"2");
        append(&relay, "b", b"3");

        let report = relay.run_once().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 1);

        let failed = relay.store().get(first).unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.retry_count, 1);

        // Still backing off: nothing for key "a" moves.
        assert_eq!(relay.run_once().unwrap().claimed, 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(relay.run_once().unwrap().published, 2);

        let key_a: Vec<_> = stream
            .messages(TOPIC)
            .into_iter()
            .filter(|m| m.key == "a")
            .map(|m| m.payload)
            .collect();
        assert_eq!(key_a, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn exhausted_retries_go_to_dead_letter_topic() {
        let (relay, stream, clock) = setup(usize::MAX);
        let id = append(&relay, "a", b"{\"type\":\"LIKE\"}");

        for _ in 0..3 {
            relay.run_once().unwrap();
            clock.advance(Duration::from_secs(10));
        }

        let record = relay.store().get(id).unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::DeadLettered);
        assert_eq!(record.retry_count, 3);

        let letters = stream.messages(DLQ);
        assert_eq!(letters.len(), 1);
        let letter = DeadLetter::from_json(&letters[0].payload).unwrap();
        assert_eq!(letter.source_topic, TOPIC);
        assert_eq!(letter.original_payload().unwrap(), b"{\"type\":\"LIKE\"}".to_vec());
        assert!(letter.reason.contains("3 attempts"));

        // Terminal: never claimed again.
        clock.advance(Duration::from_secs(60));
        assert_eq!(relay.run_once().unwrap().claimed, 0);
    }

    /// Rejects everything on the main topic as too large.
    struct RejectingProducer {
        inner: InMemoryStream,
    }

    impl StreamProducer for RejectingProducer {
        fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, StreamError> {
            if topic == TOPIC {
                return Err(StreamError::Rejected("message too large".into()));
            }
            self.inner.publish(topic, key, payload)
        }
    }

    #[test]
    fn rejected_record_is_dead_lettered_without_retry() {
        let stream = InMemoryStream::new(1);
        let store = InMemoryOutboxStore::new();
        let relay = Relay::new(store, RejectingProducer { inner: stream.clone() }).with_dead_letter_topic(DLQ);

        let mut uow = relay.store().begin();
        uow.append(NewOutboxEvent::new(TOPIC, "a", b"{}".to_vec())).unwrap();
        let id = uow.commit().unwrap()[0];

        let report = relay.run_once().unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(relay.store().get(id).unwrap().unwrap().retry_count, 1);
        assert_eq!(stream.len(DLQ), 1);
    }

    #[test]
    fn purge_removes_old_terminal_records_only() {
        let (relay, _, clock) = setup(0);
        let relay = relay.with_retention(Duration::from_secs(60));
        let done = append(&relay, "a", b"1");
        relay.run_once().unwrap();

        let pending = append(&relay, "b", b"2");

        clock.advance(Duration::from_secs(61));
        assert_eq!(relay.purge().unwrap(), 1);
        assert!(relay.store().get(done).unwrap().is_none());
        assert!(relay.store().get(pending).unwrap().is_some());
    }
}
