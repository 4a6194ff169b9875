//! HashMap-backed counter store for testing and single-process use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{CounterDelta, CounterError, CounterSnapshot, CounterStore};

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    likes: i64,
    views: u64,
    comments: u64,
}

type Row = Arc<Mutex<Counters>>;

/// In-memory counter store.
///
/// Each row has its own lock, so a delta lands on all of its fields at once
/// and readers never see half of it. The map's write lock is only taken to
/// insert a row for a new content item. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    rows: Arc<RwLock<HashMap<String, Row>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content items with a counter row.
    pub fn len(&self) -> Result<usize, CounterError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| CounterError::LockPoisoned("read"))?;
        Ok(rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, CounterError> {
        Ok(self.len()? == 0)
    }

    fn row(&self, content_id: &str) -> Result<Row, CounterError> {
        {
            let rows = self
                .rows
                .read()
                .map_err(|_| CounterError::LockPoisoned("read"))?;
            if let Some(row) = rows.get(content_id) {
                return Ok(Arc::clone(row));
            }
        }

        let mut rows = self
            .rows
            .write()
            .map_err(|_| CounterError::LockPoisoned("insert"))?;
        Ok(Arc::clone(rows.entry(content_id.to_string()).or_default()))
    }
}

impl CounterStore for InMemoryCounterStore {
    fn apply_delta(&self, content_id: &str, delta: CounterDelta) -> Result<(), CounterError> {
        if delta.is_zero() {
            return Ok(());
        }
        let row = self.row(content_id)?;
        let mut counters = row
            .lock()
            .map_err(|_| CounterError::LockPoisoned("apply delta"))?;
        counters.likes += delta.likes;
        counters.views += delta.views;
        Ok(())
    }

    fn record_comment(&self, content_id: &str) -> Result<(), CounterError> {
        let row = self.row(content_id)?;
        let mut counters = row
            .lock()
            .map_err(|_| CounterError::LockPoisoned("record comment"))?;
        counters.comments += 1;
        Ok(())
    }

    fn get(&self, content_id: &str) -> Result<CounterSnapshot, CounterError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| CounterError::LockPoisoned("read"))?;

        let Some(row) = rows.get(content_id) else {
            return Ok(CounterSnapshot::empty(content_id));
        };
        let counters = *row
            .lock()
            .map_err(|_| CounterError::LockPoisoned("read row"))?;
        Ok(CounterSnapshot {
            content_id: content_id.to_string(),
            like_count: counters.likes,
            view_count: counters.views,
            comment_count: counters.comments,
        })
    }
}
