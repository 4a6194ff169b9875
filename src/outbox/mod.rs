//! Transactional outbox - durable event staging and the relay that drains it.
//!
//! The outbox pattern has two distinct phases:
//! 1. **Commit phase** - a [`UnitOfWork`] applies domain writes and appends
//!    outbox records under one lock, so both become visible together or not
//!    at all
//! 2. **Relay phase** - a [`Relay`] (usually on a [`RelayThread`]) claims
//!    pending records, publishes them to the stream, and marks them
//!    processed, failed with backoff, or dead-lettered
//!
//! ## Example
//!
//! ```
//! use interaction_pipeline::outbox::{InMemoryOutboxStore, OutboxStore, Relay};
//! use interaction_pipeline::stream::InMemoryStream;
//! use interaction_pipeline::InteractionEvent;
//!
//! let store = InMemoryOutboxStore::new();
//! let mut uow = store.begin();
//! uow.enqueue_interaction("interactions.events", &InteractionEvent::like("post-1", "u-1")).unwrap();
//! uow.commit().unwrap();
//!
//! let stream = InMemoryStream::new(4);
//! let relay = Relay::new(store, stream.clone());
//! assert_eq!(relay.run_once().unwrap().published, 1);
//! assert_eq!(stream.len("interactions.events"), 1);
//! ```

mod error;
mod in_memory;
mod record;
mod relay;
mod store;
mod thread;
mod unit_of_work;

pub use error::OutboxError;
pub use in_memory::InMemoryOutboxStore;
pub use record::{NewOutboxEvent, OutboxRecord, OutboxStatus};
pub use relay::{Relay, RelayReport};
pub use store::OutboxStore;
pub use thread::{RelayStats, RelayThread};
pub use unit_of_work::{DomainWrite, UnitOfWork};
