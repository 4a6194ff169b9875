use std::sync::Arc;

use super::{CounterDelta, CounterError, CounterSnapshot};

/// Storage for per-content counters.
///
/// Every mutation is a single atomic increment of the whole row, so
/// concurrent flushes from different partitions never lose updates and a
/// reader sees all of a delta or none of it.
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the like and view counts of `content_id`.
    fn apply_delta(&self, content_id: &str, delta: CounterDelta) -> Result<(), CounterError>;

    /// Increment the comment count, inside the transaction that stores the comment.
    fn record_comment(&self, content_id: &str) -> Result<(), CounterError>;

    /// Current totals; zeros for an unknown content item.
    fn get(&self, content_id: &str) -> Result<CounterSnapshot, CounterError>;
}

impl<C: CounterStore + ?Sized> CounterStore for Arc<C> {
    fn apply_delta(&self, content_id: &str, delta: CounterDelta) -> Result<(), CounterError> {
        (**self).apply_delta(content_id, delta)
    }

    fn record_comment(&self, content_id: &str) -> Result<(), CounterError> {
        (**self).record_comment(content_id)
    }

    fn get(&self, content_id: &str) -> Result<CounterSnapshot, CounterError> {
        (**self).get(content_id)
    }
}
