use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::buffer::{AggregationBuffer, NetDelta};
use super::ConsumerError;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConsumerConfig, DEFAULT_DEAD_LETTER_TOPIC};
use crate::counters::{CounterError, CounterStore};
use crate::interaction::InteractionEvent;
use crate::stream::{DeadLetter, PartitionConsumer, StreamMessage, StreamProducer};
use crate::trending::{TrendingEngine, TrendingError, WeightTable};

/// Where a flush writes to.
#[derive(Clone)]
pub struct FlushTargets {
    pub counters: Arc<dyn CounterStore>,
    pub trending: Arc<dyn TrendingEngine>,
    pub weights: WeightTable,
}

impl FlushTargets {
    pub fn new(counters: Arc<dyn CounterStore>, trending: Arc<dyn TrendingEngine>, weights: WeightTable) -> Self {
        Self {
            counters,
            trending,
            weights,
        }
    }

    /// Apply counter and trending writes in parallel and wait for both.
    ///
    /// Both sides always run to completion; the counter error wins if both fail.
    pub fn apply(&self, deltas: &[NetDelta]) -> Result<(), ConsumerError> {
        let counters = &self.counters;
        let trending = &self.trending;
        let weights = &self.weights;

        let (counter_result, trending_result) = thread::scope(|scope| {
            let counter_task = scope.spawn(|| -> Result<(), CounterError> {
                for delta in deltas {
                    counters.apply_delta(&delta.content_id, delta.counter_delta())?;
                }
                Ok(())
            });
            let trending_task = scope.spawn(|| -> Result<(), TrendingError> {
                for delta in deltas {
                    trending.increment_score(&delta.content_id, delta.trending_weight(weights))?;
                }
                Ok(())
            });
            (counter_task.join(), trending_task.join())
        });

        counter_result.map_err(|_| ConsumerError::FlushPanicked("counters"))??;
        trending_result.map_err(|_| ConsumerError::FlushPanicked("trending"))??;
        Ok(())
    }
}

/// Where a worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Pulling,
    ProcessingBatch,
    Flushing,
    Committing,
}

/// Outcome of one pull-process-flush-commit cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub pulled: usize,
    pub applied: usize,
    pub dead_lettered: usize,
    pub flushes: usize,
    /// Position committed at the end of the cycle, if anything was pulled.
    pub committed_offset: Option<u64>,
}

/// Drives one partition: pull a bounded batch, net it per content item,
/// flush to counters and trending, then commit.
///
/// Offsets are committed only after the flush that covers them has been
/// applied. A crash in between replays those messages, and their deltas are
/// applied a second time.
pub struct PartitionWorker<C, P> {
    consumer: C,
    producer: P,
    targets: FlushTargets,
    buffer: AggregationBuffer,
    state: WorkerState,
    clock: Arc<dyn Clock>,
    dead_letter_topic: String,
    batch_size: usize,
    max_poll_records: usize,
    poll_timeout: Duration,
    flush_interval: Duration,
    last_flush: Instant,
}

impl<C: PartitionConsumer, P: StreamProducer> PartitionWorker<C, P> {
    /// `producer` receives dead letters for malformed messages.
    pub fn new(consumer: C, producer: P, targets: FlushTargets) -> Self {
        let defaults = ConsumerConfig::default();
        Self {
            consumer,
            producer,
            targets,
            buffer: AggregationBuffer::new(),
            state: WorkerState::Idle,
            clock: Arc::new(SystemClock),
            dead_letter_topic: DEFAULT_DEAD_LETTER_TOPIC.to_string(),
            batch_size: defaults.batch_size,
            max_poll_records: defaults.max_poll_records,
            poll_timeout: defaults.poll_timeout(),
            flush_interval: defaults.flush_interval(),
            last_flush: Instant::now(),
        }
    }

    pub fn with_config(mut self, config: &ConsumerConfig) -> Self {
        self.batch_size = config.batch_size;
        self.max_poll_records = config.max_poll_records;
        self.poll_timeout = config.poll_timeout();
        self.flush_interval = config.flush_interval();
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = topic.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn partition(&self) -> u32 {
        self.consumer.partition()
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Run one cycle.
    ///
    /// On failure the buffer is discarded and the consumer rewound to the
    /// last committed offset, so the next cycle sees the same messages again.
    pub fn run_cycle(&mut self) -> Result<CycleReport, ConsumerError> {
        self.state = WorkerState::Pulling;
        let messages = match self.consumer.poll_batch(self.max_poll_records, self.poll_timeout) {
            Ok(messages) => messages,
            Err(err) => {
                self.state = WorkerState::Idle;
                return Err(err.into());
            }
        };

        let mut report = CycleReport {
            pulled: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            self.state = WorkerState::Idle;
            return Ok(report);
        }

        let result = self.process(&messages, &mut report);
        self.state = WorkerState::Idle;

        if let Err(err) = result {
            self.buffer.clear();
            if let Err(rewind_err) = self.consumer.rewind() {
                warn!(
                    partition = self.consumer.partition(),
                    error = %rewind_err,
                    "rewind after failed cycle failed"
                );
            }
            return Err(err);
        }
        Ok(report)
    }

    fn process(&mut self, messages: &[StreamMessage], report: &mut CycleReport) -> Result<(), ConsumerError> {
        self.state = WorkerState::ProcessingBatch;

        for message in messages {
            let decoded = InteractionEvent::from_json(&message.payload)
                .and_then(|event| self.buffer.apply(&event));

            match decoded {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    self.dead_letter(message, &err.to_string())?;
                    report.dead_lettered += 1;
                }
            }

            self.consumer.heartbeat()?;

            if self.buffer.len() >= self.batch_size || self.last_flush.elapsed() >= self.flush_interval {
                self.flush_and_commit(message.next_offset(), report)?;
            }
        }

        if let Some(last) = messages.last() {
            // end-of-pull flush is unconditional
            self.flush_and_commit(last.next_offset(), report)?;
        }
        Ok(())
    }

    fn flush_and_commit(&mut self, next_offset: u64, report: &mut CycleReport) -> Result<(), ConsumerError> {
        if report.committed_offset == Some(next_offset) {
            return Ok(());
        }

        self.state = WorkerState::Flushing;
        if !self.buffer.is_empty() {
            let events = self.buffer.len();
            let deltas = self.buffer.drain();
            self.targets.apply(&deltas)?;
            report.flushes += 1;
            debug!(
                partition = self.consumer.partition(),
                events,
                items = deltas.len(),
                "flushed interaction deltas"
            );
        }
        self.last_flush = Instant::now();

        self.state = WorkerState::Committing;
        self.consumer.commit(next_offset)?;
        report.committed_offset = Some(next_offset);
        self.state = WorkerState::ProcessingBatch;
        Ok(())
    }

    fn dead_letter(&self, message: &StreamMessage, reason: &str) -> Result<(), ConsumerError> {
        error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %message.key,
            payload = message.payload_str().unwrap_or("<binary>"),
            reason,
            "malformed interaction"
        );
        DeadLetter::new(&message.topic, &message.key, &message.payload, reason, self.clock.now())
            .with_offset(message.offset)
            .publish(&self.producer, &self.dead_letter_topic)
            .map_err(ConsumerError::DeadLetter)?;
        Ok(())
    }

    /// Give up the partition. Nothing is buffered between cycles, so there is
    /// nothing left to flush.
    pub fn shutdown(self) -> Result<(), ConsumerError> {
        self.consumer.release()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{CounterDelta, InMemoryCounterStore};
    use crate::stream::{InMemoryStream, PartitionedStream, StreamError};
    use crate::trending::InMemoryTrending;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TOPIC: &str = "interactions.events";
    const DLQ: &str = "interactions.events.dlq";
    const GROUP: &str = "test-group";

    struct Fixture {
        stream: InMemoryStream,
        counters: Arc<InMemoryCounterStore>,
        trending: Arc<InMemoryTrending>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut windows = BTreeMap::new();
            windows.insert("24h".to_string(), Duration::from_secs(86_400));
            Self {
                stream: InMemoryStream::new(1),
                counters: Arc::new(InMemoryCounterStore::new()),
                trending: Arc::new(InMemoryTrending::new(windows)),
            }
        }

        fn targets(&self) -> FlushTargets {
            FlushTargets::new(self.counters.clone(), self.trending.clone(), WeightTable::default())
        }

        fn worker(&self, config: ConsumerConfig) -> PartitionWorker<crate::stream::InMemoryPartitionConsumer, InMemoryStream> {
            let consumer = self.stream.subscribe(GROUP, TOPIC, 0).unwrap();
            PartitionWorker::new(consumer, self.stream.clone(), self.targets())
                .with_config(&config)
                .with_dead_letter_topic(DLQ)
        }

        fn send(&self, event: &InteractionEvent) {
            self.stream
                .publish(TOPIC, &event.content_id, event.to_json().unwrap())
                .unwrap();
        }
    }

    fn quick() -> ConsumerConfig {
        ConsumerConfig {
            poll_timeout_ms: 5,
            ..ConsumerConfig::default()
        }
    }

    #[test]
    fn cycle_nets_flushes_and_commits() {
        let fixture = Fixture::new();
        fixture.send(&InteractionEvent::like("A", "U1"));
        fixture.send(&InteractionEvent::view("A", Some("U1")));
        fixture.send(&InteractionEvent::like("A", "U2"));

        let mut worker = fixture.worker(quick());
        let report = worker.run_cycle().unwrap();

        assert_eq!(report.pulled, 3);
        assert_eq!(report.applied, 3);
        assert_eq!(report.flushes, 1);
        assert_eq!(report.committed_offset, Some(3));
        assert_eq!(worker.state(), WorkerState::Idle);

        let counters = fixture.counters.get("A").unwrap();
        assert_eq!((counters.like_count, counters.view_count), (2, 1));
        assert_eq!(fixture.trending.score("24h", "A").unwrap(), Some(5));
        assert_eq!(fixture.stream.committed_offset(GROUP, TOPIC, 0), Some(3));
        assert!(fixture.stream.heartbeats(GROUP, TOPIC, 0) >= 3);
    }

    #[test]
    fn empty_poll_is_a_no_op() {
        let fixture = Fixture::new();
        let mut worker = fixture.worker(quick());

        assert_eq!(worker.run_cycle().unwrap(), CycleReport::default());
        assert_eq!(fixture.stream.committed_offset(GROUP, TOPIC, 0), None);
    }

    #[test]
    fn malformed_message_is_dead_lettered_and_skipped() {
        let fixture = Fixture::new();
        fixture.send(&InteractionEvent::view("A", None));
        fixture.stream.publish(TOPIC, "A", b"not json".to_vec()).unwrap();
        fixture.send(&InteractionEvent::view("A", None));

        let mut worker = fixture.worker(quick());
        let report = worker.run_cycle().unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.committed_offset, Some(3));
        assert_eq!(fixture.counters.get("A").unwrap().view_count, 2);

        let dead = fixture.stream.messages(DLQ);
        assert_eq!(dead.len(), 1);
        let letter = DeadLetter::from_json(&dead[0].payload).unwrap();
        assert_eq!(letter.offset, Some(1));
        assert_eq!(letter.original_payload().unwrap(), b"not json");
    }

    #[test]
    fn batch_size_forces_intermediate_flushes() {
        let fixture = Fixture::new();
        for i in 0..5 {
            fixture.send(&InteractionEvent::view("A", Some(format!("u{i}").as_str())));
        }

        let mut worker = fixture.worker(ConsumerConfig {
            batch_size: 2,
            ..quick()
        });
        let report = worker.run_cycle().unwrap();

        assert_eq!(report.flushes, 3);
        assert_eq!(report.committed_offset, Some(5));
        assert_eq!(fixture.counters.get("A").unwrap().view_count, 5);
    }

    struct BrokenCounters {
        broken: AtomicBool,
        inner: InMemoryCounterStore,
    }

    impl CounterStore for BrokenCounters {
        fn apply_delta(&self, content_id: &str, delta: CounterDelta) -> Result<(), CounterError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CounterError::Unavailable("connection reset".into()));
            }
            self.inner.apply_delta(content_id, delta)
        }

        fn record_comment(&self, content_id: &str) -> Result<(), CounterError> {
            self.inner.record_comment(content_id)
        }

        fn get(&self, content_id: &str) -> Result<crate::counters::CounterSnapshot, CounterError> {
            self.inner.get(content_id)
        }
    }

    #[test]
    fn failed_flush_rewinds_without_commit() {
        let fixture = Fixture::new();
        fixture.send(&InteractionEvent::like("A", "U1"));
        fixture.send(&InteractionEvent::like("A", "U2"));

        let counters = Arc::new(BrokenCounters {
            broken: AtomicBool::new(true),
            inner: InMemoryCounterStore::new(),
        });
        let targets = FlushTargets::new(counters.clone(), fixture.trending.clone(), WeightTable::default());
        let consumer = fixture.stream.subscribe(GROUP, TOPIC, 0).unwrap();
        let mut worker = PartitionWorker::new(consumer, fixture.stream.clone(), targets).with_config(&quick());

        assert!(matches!(worker.run_cycle(), Err(ConsumerError::Counter(_))));
        assert_eq!(fixture.stream.committed_offset(GROUP, TOPIC, 0), None);
        assert_eq!(worker.consumer().position(), 0);

        counters.broken.store(false, Ordering::SeqCst);
        let report = worker.run_cycle().unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(counters.get("A").unwrap().like_count, 2);
        // trending already took the first attempt; replay adds it again
        assert_eq!(fixture.trending.score("24h", "A").unwrap(), Some(8));
    }

    struct RejectingProducer;

    impl StreamProducer for RejectingProducer {
        fn publish(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> Result<crate::stream::Delivery, StreamError> {
            Err(StreamError::ConnectionFailed("broker unreachable".into()))
        }
    }

    #[test]
    fn dead_letter_failure_fails_the_cycle() {
        let fixture = Fixture::new();
        fixture.stream.publish(TOPIC, "A", b"{}".to_vec()).unwrap();

        let consumer = fixture.stream.subscribe(GROUP, TOPIC, 0).unwrap();
        let mut worker = PartitionWorker::new(consumer, RejectingProducer, fixture.targets()).with_config(&quick());

        assert!(matches!(worker.run_cycle(), Err(ConsumerError::DeadLetter(_))));
        assert_eq!(fixture.stream.committed_offset(GROUP, TOPIC, 0), None);
    }

    #[test]
    fn shutdown_releases_partition() {
        let fixture = Fixture::new();
        let worker = fixture.worker(quick());
        assert!(fixture.stream.is_owned(GROUP, TOPIC, 0));

        worker.shutdown().unwrap();
        assert!(!fixture.stream.is_owned(GROUP, TOPIC, 0));
    }
}
