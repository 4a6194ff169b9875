use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use super::worker::{FlushTargets, PartitionWorker};
use super::ConsumerError;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::stream::{PartitionConsumer, PartitionedStream, StreamProducer};

/// Totals across every worker of a group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub cycles: usize,
    pub pulled: usize,
    pub applied: usize,
    pub dead_lettered: usize,
    pub flushes: usize,
    pub errors: usize,
}

impl ConsumerStats {
    fn merge(&mut self, other: ConsumerStats) {
        self.cycles += other.cycles;
        self.pulled += other.pulled;
        self.applied += other.applied;
        self.dead_lettered += other.dead_lettered;
        self.flushes += other.flushes;
        self.errors += other.errors;
    }
}

struct Member {
    partition: u32,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

/// One worker thread per partition of the interaction topic.
///
/// Partitions are processed in parallel, each strictly in order. A failed
/// cycle is retried after `consumer.retry_backoff_ms` from the last
/// committed offset.
pub struct ConsumerGroup {
    members: Vec<Member>,
}

impl ConsumerGroup {
    /// Subscribe to every partition of `config.topic` and start the workers.
    pub fn spawn<S, P>(
        stream: &S,
        producer: P,
        targets: FlushTargets,
        config: &PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConsumerError>
    where
        S: PartitionedStream,
        P: StreamProducer + Clone + 'static,
    {
        let partitions = stream.partition_count(&config.topic);
        let mut group = ConsumerGroup {
            members: Vec::with_capacity(partitions as usize),
        };

        for partition in 0..partitions {
            let consumer = stream.subscribe(&config.consumer_group, &config.topic, partition)?;
            let worker = PartitionWorker::new(consumer, producer.clone(), targets.clone())
                .with_config(&config.consumer)
                .with_dead_letter_topic(config.dead_letter_topic.clone())
                .with_clock(clock.clone());
            group.start(worker, config.consumer.retry_backoff())?;
        }

        info!(
            group = %config.consumer_group,
            topic = %config.topic,
            partitions,
            "consumer group started"
        );
        Ok(group)
    }

    fn start<C, P>(&mut self, mut worker: PartitionWorker<C, P>, retry_backoff: Duration) -> Result<(), ConsumerError>
    where
        C: PartitionConsumer + 'static,
        P: StreamProducer + 'static,
    {
        let partition = worker.partition();
        let (stop_tx, stop_rx) = channel();

        let handle = thread::Builder::new()
            .name(format!("consumer-p{partition}"))
            .spawn(move || {
                let mut stats = ConsumerStats::default();

                loop {
                    match stop_rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                    }

                    stats.cycles += 1;
                    match worker.run_cycle() {
                        Ok(report) => {
                            stats.pulled += report.pulled;
                            stats.applied += report.applied;
                            stats.dead_lettered += report.dead_lettered;
                            stats.flushes += report.flushes;
                        }
                        Err(err) => {
                            stats.errors += 1;
                            error!(partition, error = %err, "consumer cycle failed, retrying");
                            match stop_rx.recv_timeout(retry_backoff) {
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                                Err(RecvTimeoutError::Timeout) => {}
                            }
                        }
                    }
                }

                if let Err(err) = worker.shutdown() {
                    warn!(partition, error = %err, "failed to release partition");
                }
                info!(partition, applied = stats.applied, "partition worker stopped");
                stats
            })?;

        self.members.push(Member {
            partition,
            stop_tx,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Partitions owned by this group.
    pub fn partitions(&self) -> Vec<u32> {
        self.members.iter().map(|m| m.partition).collect()
    }

    /// Signal every worker, wait for in-flight cycles to commit, and release
    /// the partitions.
    pub fn stop(mut self) -> ConsumerStats {
        for member in &self.members {
            let _ = member.stop_tx.send(());
        }

        let mut total = ConsumerStats::default();
        for member in &mut self.members {
            if let Some(handle) = member.handle.take() {
                total.merge(handle.join().unwrap_or_default());
            }
        }
        total
    }
}

impl Drop for ConsumerGroup {
    fn drop(&mut self) {
        for member in &self.members {
            let _ = member.stop_tx.send(());
        }
    }
}
