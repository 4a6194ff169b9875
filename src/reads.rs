//! Read side for the API layer: trending lists and counters.

use std::sync::Arc;

use thiserror::Error;

use crate::counters::{CounterError, CounterSnapshot, CounterStore};
use crate::trending::{TrendingEngine, TrendingError};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unknown trending window {window}; expected one of {valid:?}")]
    UnknownWindow { window: String, valid: Vec<String> },
    #[error(transparent)]
    Trending(#[from] TrendingError),
    #[error(transparent)]
    Counters(#[from] CounterError),
}

/// Queries served straight from the counter store and trending leaderboards.
///
/// Trending returns ids only; callers fetch content metadata themselves.
#[derive(Clone)]
pub struct InteractionReads {
    counters: Arc<dyn CounterStore>,
    trending: Arc<dyn TrendingEngine>,
}

impl InteractionReads {
    pub fn new(counters: Arc<dyn CounterStore>, trending: Arc<dyn TrendingEngine>) -> Self {
        Self { counters, trending }
    }

    /// Up to `limit` content ids from `window`, highest score first.
    pub fn get_trending(&self, window: &str, limit: usize) -> Result<Vec<String>, ReadError> {
        let valid = self.trending.windows();
        if !valid.iter().any(|name| name == window) {
            return Err(ReadError::UnknownWindow {
                window: window.to_string(),
                valid,
            });
        }
        Ok(self.trending.top_n(window, limit)?)
    }

    pub fn get_counters(&self, content_id: &str) -> Result<CounterSnapshot, ReadError> {
        Ok(self.counters.get(content_id)?)
    }
}
