//! Shared wiring for the pipeline integration tests.
//!
//! Everything runs in memory on a manual clock, and the relay and partition
//! workers are driven step by step so each test controls exactly when
//! events move between stages.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use interaction_pipeline::{
    ConsumerConfig, CycleReport, FlushTargets, InMemoryCounterStore, InMemoryOutboxStore,
    InMemoryPartitionConsumer, InMemoryStream, InMemoryTrending, InteractionEvent,
    InteractionReads, ManualClock, OutboxStore, PartitionWorker, PartitionedStream,
    PipelineConfig, Relay, RelayReport,
};

pub type Worker = PartitionWorker<InMemoryPartitionConsumer, InMemoryStream>;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Harness {
    pub config: PipelineConfig,
    pub clock: ManualClock,
    pub outbox: InMemoryOutboxStore,
    pub stream: InMemoryStream,
    pub counters: Arc<InMemoryCounterStore>,
    pub trending: Arc<InMemoryTrending>,
    pub reads: InteractionReads,
    pub relay: Relay<InMemoryOutboxStore, InMemoryStream>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let clock = ManualClock::default();
        let outbox = InMemoryOutboxStore::with_clock(Arc::new(clock.clone()));
        let stream = InMemoryStream::new(config.partitions);
        let counters = Arc::new(InMemoryCounterStore::new());
        let trending = Arc::new(InMemoryTrending::with_clock(
            config.trending.window_retentions(),
            Arc::new(clock.clone()),
        ));
        let reads = InteractionReads::new(counters.clone(), trending.clone());
        let relay = Relay::from_config(outbox.clone(), stream.clone(), &config.relay, &config.dead_letter_topic)
            .with_clock(Arc::new(clock.clone()));

        Self {
            config,
            clock,
            outbox,
            stream,
            counters,
            trending,
            reads,
            relay,
        }
    }

    pub fn targets(&self) -> FlushTargets {
        FlushTargets::new(self.counters.clone(), self.trending.clone(), self.config.trending.weights)
    }

    /// One worker per partition for `group`.
    pub fn workers(&self, group: &str) -> Vec<Worker> {
        (0..self.stream.partition_count(&self.config.topic))
            .map(|partition| {
                let consumer = self
                    .stream
                    .subscribe(group, &self.config.topic, partition)
                    .expect("partition should be free");
                PartitionWorker::new(consumer, self.stream.clone(), self.targets())
                    .with_config(&self.config.consumer)
                    .with_dead_letter_topic(self.config.dead_letter_topic.clone())
                    .with_clock(Arc::new(self.clock.clone()))
            })
            .collect()
    }

    /// Commit each event in its own unit of work.
    pub fn enqueue(&self, events: &[InteractionEvent]) {
        for event in events {
            let mut uow = self.outbox.begin();
            uow.enqueue_interaction(&self.config.topic, event)
                .expect("valid interaction");
            uow.commit().expect("commit");
        }
    }

    /// Commit every event in a single unit of work.
    pub fn enqueue_batch(&self, events: &[InteractionEvent]) {
        let mut uow = self.outbox.begin();
        for event in events {
            uow.enqueue_interaction(&self.config.topic, event)
                .expect("valid interaction");
        }
        uow.commit().expect("commit");
    }

    pub fn relay_all(&self) -> RelayReport {
        let mut total = RelayReport::default();
        loop {
            let report = self.relay.run_once().expect("relay pass");
            total.claimed += report.claimed;
            total.published += report.published;
            total.failed += report.failed;
            total.dead_lettered += report.dead_lettered;
            total.skipped += report.skipped;
            if report.claimed == 0 || report.published == 0 {
                return total;
            }
        }
    }

    pub fn score(&self, window: &str, content_id: &str) -> u64 {
        self.trending
            .score(window, content_id)
            .expect("known window")
            .unwrap_or(0)
    }
}

/// Run cycles on every worker until none of them pulls anything.
pub fn drain(workers: &mut [Worker]) -> CycleReport {
    let mut total = CycleReport::default();
    loop {
        let mut pulled = 0;
        for worker in workers.iter_mut() {
            let report = worker.run_cycle().expect("consumer cycle");
            pulled += report.pulled;
            total.pulled += report.pulled;
            total.applied += report.applied;
            total.dead_lettered += report.dead_lettered;
            total.flushes += report.flushes;
        }
        if pulled == 0 {
            return total;
        }
    }
}

pub fn test_config() -> PipelineConfig {
    let mut windows = BTreeMap::new();
    windows.insert("24h".to_string(), DAY.as_secs());
    windows.insert("7d".to_string(), (DAY * 7).as_secs());

    let mut config = PipelineConfig {
        partitions: 2,
        consumer: ConsumerConfig {
            poll_timeout_ms: 1,
            ..ConsumerConfig::default()
        },
        ..PipelineConfig::default()
    };
    config.trending.windows = windows;
    config
}
