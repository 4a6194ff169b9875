//! Batch consumer - turns the interaction stream into counter and trending writes.
//!
//! ```text
//!  poll_batch ──▶ decode ──▶ AggregationBuffer ──▶ flush ──┬──▶ CounterStore   ──┐
//!      │            │          (net per item)              └──▶ TrendingEngine ──┴──▶ commit offset
//!      │            └── malformed ──▶ dead-letter topic
//!      └── one PartitionWorker per partition, one thread each (ConsumerGroup)
//! ```

mod buffer;
mod group;
mod worker;

use thiserror::Error;

use crate::counters::CounterError;
use crate::stream::StreamError;
use crate::trending::TrendingError;

pub use buffer::{AggregationBucket, AggregationBuffer, NetDelta};
pub use group::{ConsumerGroup, ConsumerStats};
pub use worker::{CycleReport, FlushTargets, PartitionWorker, WorkerState};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("dead-letter publish failed: {0}")]
    DeadLetter(#[source] StreamError),
    #[error("counter flush failed: {0}")]
    Counter(#[from] CounterError),
    #[error("trending flush failed: {0}")]
    Trending(#[from] TrendingError),
    #[error("{0} flush panicked")]
    FlushPanicked(&'static str),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
