//! Trending - per-window leaderboards of content items.
//!
//! Each flush adds a weighted score to every configured window. A window
//! forgets an item once it has gone a full retention period without an
//! increment, and drops everything after a retention period with no activity
//! at all, so a leaderboard reflects recent interest without decay math.

mod in_memory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interaction::InteractionKind;

pub use in_memory::InMemoryTrending;

/// Score contributed by one unit of each interaction kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    pub like: u64,
    pub view: u64,
    pub comment: u64,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            like: 2,
            view: 1,
            comment: 5,
        }
    }
}

impl WeightTable {
    pub fn weight_of(&self, kind: InteractionKind) -> u64 {
        match kind {
            InteractionKind::Like => self.like,
            InteractionKind::View => self.view,
            InteractionKind::Comment => self.comment,
            InteractionKind::Unlike => 0,
        }
    }

    /// Weighted sum of positive deltas. A net unlike contributes nothing, so
    /// scores never decrease.
    pub fn score(&self, net_likes: i64, views: u64, comments: u64) -> u64 {
        let likes = u64::try_from(net_likes).unwrap_or(0);
        likes
            .saturating_mul(self.like)
            .saturating_add(views.saturating_mul(self.view))
            .saturating_add(comments.saturating_mul(self.comment))
    }
}

#[derive(Debug, Error)]
pub enum TrendingError {
    #[error("unknown trending window: {0}")]
    UnknownWindow(String),
    #[error("trending store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("trending store unavailable: {0}")]
    Unavailable(String),
}

/// Leaderboard storage keyed by window name.
pub trait TrendingEngine: Send + Sync {
    /// Add `weight` to `content_id` in every window and refresh the window's TTL.
    fn increment_score(&self, content_id: &str, weight: u64) -> Result<(), TrendingError>;

    /// Up to `n` content ids by descending score; ties go to the most recently
    /// incremented item.
    fn top_n(&self, window: &str, n: usize) -> Result<Vec<String>, TrendingError>;

    /// Names of the configured windows.
    fn windows(&self) -> Vec<String>;
}

impl<T: TrendingEngine + ?Sized> TrendingEngine for Arc<T> {
    fn increment_score(&self, content_id: &str, weight: u64) -> Result<(), TrendingError> {
        (**self).increment_score(content_id, weight)
    }

    fn top_n(&self, window: &str, n: usize) -> Result<Vec<String>, TrendingError> {
        (**self).top_n(window, n)
    }

    fn windows(&self) -> Vec<String> {
        (**self).windows()
    }
}
