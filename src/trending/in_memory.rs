use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tracing::debug;

use super::{TrendingEngine, TrendingError};
use crate::clock::{Clock, SystemClock};

struct Entry {
    score: u64,
    last_bumped: SystemTime,
    /// Increment sequence number; breaks score ties in favour of recency.
    seq: u64,
}

struct Window {
    retention: Duration,
    expires_at: Option<SystemTime>,
    entries: HashMap<String, Entry>,
}

impl Window {
    fn new(retention: Duration) -> Self {
        Self {
            retention,
            expires_at: None,
            entries: HashMap::new(),
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn entry_live(&self, entry: &Entry, now: SystemTime) -> bool {
        entry.last_bumped + self.retention > now
    }
}

struct Leaderboards {
    windows: BTreeMap<String, Window>,
    seq: u64,
    /// Writes sweep out expired entries once this passes.
    next_sweep: Option<SystemTime>,
    sweep_every: Duration,
}

impl Leaderboards {
    /// Drop expired windows and entries. Returns the number of entries removed.
    fn sweep(&mut self, now: SystemTime) -> usize {
        let mut removed = 0;
        for (name, window) in self.windows.iter_mut() {
            let before = window.entries.len();
            if window.is_expired(now) {
                window.entries.clear();
                window.expires_at = None;
            } else {
                let retention = window.retention;
                window
                    .entries
                    .retain(|_, entry| entry.last_bumped + retention > now);
            }
            let dropped = before - window.entries.len();
            if dropped > 0 {
                debug!(window = %name, dropped, "expired trending entries swept");
            }
            removed += dropped;
        }
        self.next_sweep = Some(now + self.sweep_every);
        removed
    }
}

/// In-memory trending leaderboards, one sorted view per configured window.
///
/// Clone-friendly via Arc.
#[derive(Clone)]
pub struct InMemoryTrending {
    state: Arc<RwLock<Leaderboards>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTrending {
    /// Leaderboards for `windows` (name to retention), using the system clock.
    pub fn new(windows: BTreeMap<String, Duration>) -> Self {
        Self::with_clock(windows, Arc::new(SystemClock))
    }

    pub fn with_clock(windows: BTreeMap<String, Duration>, clock: Arc<dyn Clock>) -> Self {
        // Sweeping as often as the shortest window keeps every entry at most
        // two retentions past its last bump.
        let sweep_every = windows.values().copied().min().unwrap_or(Duration::ZERO);
        let windows = windows
            .into_iter()
            .map(|(name, retention)| (name, Window::new(retention)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(Leaderboards {
                windows,
                seq: 0,
                next_sweep: None,
                sweep_every,
            })),
            clock,
        }
    }

    /// Entries held for `window`, live or not yet swept.
    pub fn stored_entries(&self, window: &str) -> Result<usize, TrendingError> {
        let state = self
            .state
            .read()
            .map_err(|_| TrendingError::LockPoisoned("read"))?;
        state
            .windows
            .get(window)
            .map(|w| w.entries.len())
            .ok_or_else(|| TrendingError::UnknownWindow(window.to_string()))
    }

    /// Current score of `content_id` in `window`, if it is still live.
    pub fn score(&self, window: &str, content_id: &str) -> Result<Option<u64>, TrendingError> {
        let now = self.clock.now();
        let state = self
            .state
            .read()
            .map_err(|_| TrendingError::LockPoisoned("read"))?;
        let window_state = state
            .windows
            .get(window)
            .ok_or_else(|| TrendingError::UnknownWindow(window.to_string()))?;
        if window_state.is_expired(now) {
            return Ok(None);
        }
        Ok(window_state
            .entries
            .get(content_id)
            .filter(|entry| window_state.entry_live(entry, now))
            .map(|entry| entry.score))
    }

    /// Drop expired windows and entries now. Returns the number of entries removed.
    ///
    /// Writes already sweep once per shortest retention; this is for callers
    /// that want to reclaim memory while no increments arrive.
    pub fn purge_expired(&self) -> Result<usize, TrendingError> {
        let now = self.clock.now();
        let mut state = self
            .state
            .write()
            .map_err(|_| TrendingError::LockPoisoned("purge"))?;
        Ok(state.sweep(now))
    }
}

impl TrendingEngine for InMemoryTrending {
    fn increment_score(&self, content_id: &str, weight: u64) -> Result<(), TrendingError> {
        if weight == 0 {
            return Ok(());
        }
        let now = self.clock.now();
        let mut state = self
            .state
            .write()
            .map_err(|_| TrendingError::LockPoisoned("increment"))?;
        if !matches!(state.next_sweep, Some(at) if at > now) {
            state.sweep(now);
        }
        state.seq += 1;
        let seq = state.seq;

        for (name, window) in state.windows.iter_mut() {
            if window.is_expired(now) {
                debug!(window = %name, dropped = window.entries.len(), "trending window expired");
                window.entries.clear();
            }
            let retention = window.retention;
            let entry = window
                .entries
                .entry(content_id.to_string())
                .or_insert(Entry {
                    score: 0,
                    last_bumped: now,
                    seq,
                });
            if entry.last_bumped + retention <= now {
                entry.score = 0;
            }
            entry.score = entry.score.saturating_add(weight);
            entry.last_bumped = now;
            entry.seq = seq;
            window.expires_at = Some(now + retention);
        }
        Ok(())
    }

    fn top_n(&self, window: &str, n: usize) -> Result<Vec<String>, TrendingError> {
        let now = self.clock.now();
        let state = self
            .state
            .read()
            .map_err(|_| TrendingError::LockPoisoned("read"))?;
        let window_state = state
            .windows
            .get(window)
            .ok_or_else(|| TrendingError::UnknownWindow(window.to_string()))?;
        if n == 0 || window_state.is_expired(now) {
            return Ok(Vec::new());
        }

        let mut live: Vec<(&String, &Entry)> = window_state
            .entries
            .iter()
            .filter(|(_, entry)| window_state.entry_live(entry, now))
            .collect();
        live.sort_by_key(|(_, entry)| (Reverse(entry.score), Reverse(entry.seq)));

        Ok(live
            .into_iter()
            .take(n)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn windows(&self) -> Vec<String> {
        match self.state.read() {
            Ok(state) => state.windows.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn trending() -> (InMemoryTrending, ManualClock) {
        let clock = ManualClock::default();
        let mut windows = BTreeMap::new();
        windows.insert("24h".to_string(), DAY);
        windows.insert("7d".to_string(), DAY * 7);
        (InMemoryTrending::with_clock(windows, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn increments_land_in_every_window() {
        let (trending, _) = trending();
        trending.increment_score("a", 5).unwrap();
        trending.increment_score("a", 2).unwrap();

        assert_eq!(trending.score("24h", "a").unwrap(), Some(7));
        assert_eq!(trending.score("7d", "a").unwrap(), Some(7));
        assert_eq!(trending.windows(), vec!["24h".to_string(), "7d".to_string()]);
    }

    #[test]
    fn top_n_is_bounded_and_sorted() {
        let (trending, _) = trending();
        trending.increment_score("low", 1).unwrap();
        trending.increment_score("high", 9).unwrap();
        trending.increment_score("mid", 4).unwrap();

        assert_eq!(trending.top_n("24h", 2).unwrap(), vec!["high", "mid"]);
        assert_eq!(trending.top_n("24h", 10).unwrap(), vec!["high", "mid", "low"]);
        assert!(trending.top_n("24h", 0).unwrap().is_empty());
    }

    #[test]
    fn ties_go_to_most_recent() {
        let (trending, _) = trending();
        trending.increment_score("older", 3).unwrap();
        trending.increment_score("newer", 3).unwrap();

        assert_eq!(trending.top_n("7d", 2).unwrap(), vec!["newer", "older"]);
    }

    #[test]
    fn unknown_window_is_an_error() {
        let (trending, _) = trending();
        assert!(matches!(
            trending.top_n("1h", 5),
            Err(TrendingError::UnknownWindow(name)) if name == "1h"
        ));
    }

    #[test]
    fn zero_weight_is_ignored() {
        let (trending, _) = trending();
        trending.increment_score("a", 0).unwrap();
        assert!(trending.top_n("24h", 5).unwrap().is_empty());
    }

    #[test]
    fn idle_item_expires_from_short_window_only() {
        let (trending, clock) = trending();
        trending.increment_score("stale", 10).unwrap();
        clock.advance(DAY / 2);
        trending.increment_score("fresh", 1).unwrap();

        clock.advance(DAY / 2);
        assert_eq!(trending.top_n("24h", 5).unwrap(), vec!["fresh"]);
        assert_eq!(trending.top_n("7d", 5).unwrap(), vec!["stale", "fresh"]);
    }

    #[test]
    fn window_without_activity_is_dropped() {
        let (trending, clock) = trending();
        trending.increment_score("a", 10).unwrap();
        clock.advance(DAY);

        assert!(trending.top_n("24h", 5).unwrap().is_empty());
        assert_eq!(trending.score("24h", "a").unwrap(), None);

        trending.increment_score("b", 1).unwrap();
        assert_eq!(trending.top_n("24h", 5).unwrap(), vec!["b"]);
        assert_eq!(trending.score("7d", "a").unwrap(), Some(10));
    }

    #[test]
    fn expired_entry_restarts_from_zero() {
        let (trending, clock) = trending();
        trending.increment_score("a", 10).unwrap();
        clock.advance(DAY * 2);
        trending.increment_score("a", 1).unwrap();

        assert_eq!(trending.score("24h", "a").unwrap(), Some(1));
        assert_eq!(trending.score("7d", "a").unwrap(), Some(11));
    }

    #[test]
    fn busy_window_sheds_stale_entries() {
        let (trending, clock) = trending();
        for i in 0..1_000 {
            trending.increment_score(&format!("once-{i}"), 1).unwrap();
        }
        for _ in 0..10 {
            clock.advance(DAY / 2);
            trending.increment_score("hot", 1).unwrap();
        }

        assert_eq!(trending.top_n("24h", 10).unwrap(), vec!["hot"]);
        assert_eq!(trending.stored_entries("24h").unwrap(), 1);
        assert_eq!(trending.stored_entries("7d").unwrap(), 1_001);

        clock.advance(DAY * 3);
        trending.increment_score("hot", 1).unwrap();
        assert_eq!(trending.stored_entries("7d").unwrap(), 1);
    }

    #[test]
    fn purge_removes_expired_entries() {
        let (trending, clock) = trending();
        trending.increment_score("a", 1).unwrap();
        clock.advance(DAY * 8);

        assert_eq!(trending.purge_expired().unwrap(), 2);
        assert_eq!(trending.purge_expired().unwrap(), 0);
    }
}
