use std::time::SystemTime;

use super::error::OutboxError;
use super::record::{NewOutboxEvent, OutboxRecord};
use super::unit_of_work::{DomainWrite, UnitOfWork};

/// Durable, append-only table of events waiting to be relayed.
///
/// Writers only ever append through a [`UnitOfWork`], so an event becomes
/// visible exactly when the domain change it describes does. Everything else
/// on this trait is for the relay.
///
/// # Examples
///
/// ```ignore
/// let mut uow = store.begin();
/// uow.write(move || comments.insert(comment));  // -> Result<(), E>
/// uow.enqueue_interaction("interactions.events", &InteractionEvent::comment("post-1", "u-1"))?;
/// uow.commit()?;
/// ```
pub trait OutboxStore: Send + Sync {
    /// Start a unit of work (the caller's transaction).
    fn begin(&self) -> UnitOfWork<'_, Self>
    where
        Self: Sized,
    {
        UnitOfWork::new(self)
    }

    /// Apply staged domain writes and append staged events, all or nothing.
    ///
    /// A failing write aborts the commit before any event is appended.
    ///
    /// Returns the ids assigned to the appended records, in staging order.
    fn commit_unit(
        &self,
        events: Vec<NewOutboxEvent>,
        writes: Vec<DomainWrite<'_>>,
    ) -> Result<Vec<u64>, OutboxError>;

    /// Records the relay may publish now, in creation order.
    ///
    /// Returns Pending records, and Failed records whose backoff has elapsed,
    /// created at or before `older_than`. A partition key whose oldest
    /// unfinished record is still backing off is held back entirely, so a
    /// later record can never overtake an earlier one for the same key.
    fn claim_batch(&self, max: usize, older_than: SystemTime) -> Result<Vec<OutboxRecord>, OutboxError>;

    fn mark_processed(&self, id: u64, at: SystemTime) -> Result<(), OutboxError>;

    /// Record a failed publish attempt; returns the new retry count.
    fn mark_failed(&self, id: u64, error: &str, retry_at: SystemTime) -> Result<u32, OutboxError>;

    fn mark_dead_lettered(&self, id: u64, error: &str, at: SystemTime) -> Result<(), OutboxError>;

    fn get(&self, id: u64) -> Result<Option<OutboxRecord>, OutboxError>;

    /// Delete terminal records that finished at or before `older_than`.
    fn purge_terminal(&self, older_than: SystemTime) -> Result<usize, OutboxError>;
}
