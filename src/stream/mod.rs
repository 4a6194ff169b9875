//! Stream transport - partitioned, at-least-once message delivery.
//!
//! This module provides the traits the relay publishes through and the
//! consumer pulls from, plus an in-memory implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   publish(topic, key)   ┌──────────────────────────────┐
//! │    Relay     │ ──────────────────────▶ │  topic                       │
//! └──────────────┘                         │   ├─ partition 0  [0][1][2]  │
//!                                          │   ├─ partition 1  [0][1]     │
//!                                          │   └─ partition N  ...        │
//!                                          └──────────────────────────────┘
//!                                                 │ poll_batch / heartbeat
//!                                                 ▼ commit (manual)
//!                                          ┌──────────────────────────────┐
//!                                          │ PartitionConsumer (1 per     │
//!                                          │ partition per group)         │
//!                                          └──────────────────────────────┘
//! ```
//!
//! The partition key is the content id, so every event for one content item is
//! read by a single worker in publish order. Ordering across keys is not
//! guaranteed.

mod consumer;
mod dead_letter;
mod in_memory;
mod message;
mod producer;

pub use consumer::{PartitionConsumer, PartitionedStream};
pub use dead_letter::DeadLetter;
pub use in_memory::{InMemoryPartitionConsumer, InMemoryStream};
pub use message::{Delivery, StreamError, StreamMessage};
pub use producer::StreamProducer;
