use std::error::Error as StdError;
use std::mem;

use tracing::debug;

use super::error::OutboxError;
use super::record::NewOutboxEvent;
use super::store::OutboxStore;
use crate::interaction::InteractionEvent;

/// A staged domain mutation, applied only if the unit of work commits.
pub type DomainWrite<'a> = Box<dyn FnOnce() -> Result<(), OutboxError> + Send + 'a>;

/// The caller's transaction: domain writes and outbox appends that commit
/// together or not at all.
///
/// Dropping a unit of work without calling [`commit`](UnitOfWork::commit)
/// rolls it back, so `?` on any failure inside the transaction discards
/// every staged event.
pub struct UnitOfWork<'a, S: OutboxStore + ?Sized> {
    store: &'a S,
    events: Vec<NewOutboxEvent>,
    writes: Vec<DomainWrite<'a>>,
}

impl<'a, S: OutboxStore + ?Sized> UnitOfWork<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            events: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Stage an outbox event.
    pub fn append(&mut self, event: NewOutboxEvent) -> Result<(), OutboxError> {
        event.validate()?;
        self.events.push(event);
        Ok(())
    }

    /// Stage an interaction event, keyed by its content id.
    pub fn enqueue_interaction(&mut self, topic: &str, event: &InteractionEvent) -> Result<(), OutboxError> {
        event.validate()?;
        let payload = event.to_json()?;
        self.append(NewOutboxEvent::new(topic, event.content_id.clone(), payload))
    }

    /// Stage a domain write.
    ///
    /// Writes run in staging order under the store's commit lock, before any
    /// event is appended. The first error aborts the commit and no event is
    /// appended; writes that already ran are not undone, so a unit should
    /// carry at most one write that can fail.
    ///
    /// The closure must not call back into the same outbox store: the commit
    /// lock is held while it runs and the call would deadlock.
    pub fn write<E>(&mut self, write: impl FnOnce() -> Result<(), E> + Send + 'a)
    where
        E: Into<Box<dyn StdError + Send + Sync>> + 'a,
    {
        self.writes
            .push(Box::new(move || write().map_err(|err| OutboxError::DomainWrite(err.into()))));
    }

    /// Number of staged outbox events.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn commit(mut self) -> Result<Vec<u64>, OutboxError> {
        let events = mem::take(&mut self.events);
        let writes = mem::take(&mut self.writes);
        let ids = self.store.commit_unit(events, writes)?;
        debug!(appended = ids.len(), "unit of work committed");
        Ok(ids)
    }

    /// Discard every staged write and event.
    pub fn rollback(self) {}
}

impl<S: OutboxStore + ?Sized> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.events.is_empty() || !self.writes.is_empty() {
            debug!(
                discarded_events = self.events.len(),
                discarded_writes = self.writes.len(),
                "unit of work rolled back"
            );
        }
    }
}
