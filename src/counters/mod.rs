//! Counters - persistent like/view/comment totals per content item.
//!
//! The consumer applies netted deltas from each flush; the domain transaction
//! that stores a comment bumps the comment count synchronously.
//!
//! ## Example
//!
//! ```
//! use interaction_pipeline::{CounterDelta, CounterStore, InMemoryCounterStore};
//!
//! let counters = InMemoryCounterStore::new();
//! counters.apply_delta("post-1", CounterDelta { likes: 2, views: 1 }).unwrap();
//! counters.record_comment("post-1").unwrap();
//!
//! let snapshot = counters.get("post-1").unwrap();
//! assert_eq!((snapshot.like_count, snapshot.view_count, snapshot.comment_count), (2, 1, 1));
//! ```

mod in_memory;
mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use in_memory::InMemoryCounterStore;
pub use store::CounterStore;

/// Increments produced by one flush for one content item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterDelta {
    /// Net likes; negative when unlikes outnumber likes.
    pub likes: i64,
    pub views: u64,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        self.likes == 0 && self.views == 0
    }
}

/// Current totals for one content item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub content_id: String,
    pub like_count: i64,
    pub view_count: u64,
    pub comment_count: u64,
}

impl CounterSnapshot {
    pub fn empty(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}
