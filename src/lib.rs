mod clock;
pub mod config;
pub mod consumer;
pub mod counters;
mod interaction;
pub mod outbox;
mod reads;
pub mod stream;
pub mod trending;

pub use clock::{unix_millis, Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConsumerConfig, PipelineConfig, RelayConfig, TrendingConfig};
pub use consumer::{
    AggregationBucket, AggregationBuffer, ConsumerError, ConsumerGroup, ConsumerStats,
    CycleReport, FlushTargets, NetDelta, PartitionWorker, WorkerState,
};
pub use counters::{CounterDelta, CounterError, CounterSnapshot, CounterStore, InMemoryCounterStore};
pub use interaction::{DecodeError, InteractionEvent, InteractionKind};
pub use outbox::{
    DomainWrite, InMemoryOutboxStore, NewOutboxEvent, OutboxError, OutboxRecord, OutboxStatus,
    OutboxStore, Relay, RelayReport, RelayStats, RelayThread, UnitOfWork,
};
pub use reads::{InteractionReads, ReadError};
pub use stream::{
    DeadLetter, Delivery, InMemoryPartitionConsumer, InMemoryStream, PartitionConsumer,
    PartitionedStream, StreamError, StreamMessage, StreamProducer,
};
pub use trending::{InMemoryTrending, TrendingEngine, TrendingError, WeightTable};
