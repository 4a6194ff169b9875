//! Per-partition aggregation between flushes.

use std::collections::{HashMap, HashSet};

use crate::counters::CounterDelta;
use crate::interaction::{DecodeError, InteractionEvent, InteractionKind};
use crate::trending::WeightTable;

/// Interactions seen for one content item since the last flush.
///
/// An actor is in at most one of the liked and unliked sets, and the latest
/// action wins. A like moves the actor into the liked set. An unlike moves
/// the actor into the unliked set, unless the actor's first action in this
/// window was a like: then the pair cancels and the actor is in neither.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregationBucket {
    liked_actors: HashSet<String>,
    unliked_actors: HashSet<String>,
    /// Actors whose first like/unlike in this window was a like.
    liked_first: HashSet<String>,
    /// Actors seen liking or unliking in this window.
    voters: HashSet<String>,
    view_delta: u64,
    comment_delta: u64,
}

impl AggregationBucket {
    pub fn liked_actors(&self) -> &HashSet<String> {
        &self.liked_actors
    }

    pub fn unliked_actors(&self) -> &HashSet<String> {
        &self.unliked_actors
    }

    pub fn view_delta(&self) -> u64 {
        self.view_delta
    }

    pub fn comment_delta(&self) -> u64 {
        self.comment_delta
    }

    pub fn net_like_delta(&self) -> i64 {
        self.liked_actors.len() as i64 - self.unliked_actors.len() as i64
    }
}

/// Netted effect of one flush window on one content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDelta {
    pub content_id: String,
    pub likes: i64,
    pub views: u64,
    /// Feeds trending only; comment counts are written by the domain transaction.
    pub comments: u64,
}

impl NetDelta {
    pub fn counter_delta(&self) -> CounterDelta {
        CounterDelta {
            likes: self.likes,
            views: self.views,
        }
    }

    pub fn trending_weight(&self, weights: &WeightTable) -> u64 {
        weights.score(self.likes, self.views, self.comments)
    }
}

/// Accumulates interactions per content item until the worker flushes.
///
/// Owned by a single partition worker; never shared between threads.
#[derive(Debug, Default)]
pub struct AggregationBuffer {
    buckets: HashMap<String, AggregationBucket>,
    events: usize,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one interaction into its content item's bucket.
    pub fn apply(&mut self, event: &InteractionEvent) -> Result<(), DecodeError> {
        event.validate()?;
        let bucket = self.buckets.entry(event.content_id.clone()).or_default();

        match (event.kind, event.actor_id.as_deref()) {
            (InteractionKind::Like, Some(actor)) => {
                if bucket.voters.insert(actor.to_string()) {
                    bucket.liked_first.insert(actor.to_string());
                }
                bucket.unliked_actors.remove(actor);
                bucket.liked_actors.insert(actor.to_string());
            }
            (InteractionKind::Unlike, Some(actor)) => {
                bucket.voters.insert(actor.to_string());
                bucket.liked_actors.remove(actor);
                // undoes a like made in this same window
                if !bucket.liked_first.contains(actor) {
                    bucket.unliked_actors.insert(actor.to_string());
                }
            }
            (InteractionKind::View, _) => bucket.view_delta += 1,
            (InteractionKind::Comment, _) => bucket.comment_delta += 1,
            (kind @ (InteractionKind::Like | InteractionKind::Unlike), None) => {
                return Err(DecodeError::MissingActor(kind));
            }
        }

        self.events += 1;
        Ok(())
    }

    /// Number of events applied since the last drain.
    pub fn len(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// Number of distinct content items buffered.
    pub fn content_items(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, content_id: &str) -> Option<&AggregationBucket> {
        self.buckets.get(content_id)
    }

    /// Empty the buffer, yielding one net delta per content item, ordered by id.
    pub fn drain(&mut self) -> Vec<NetDelta> {
        self.events = 0;
        let mut deltas: Vec<NetDelta> = self
            .buckets
            .drain()
            .map(|(content_id, bucket)| NetDelta {
                likes: bucket.net_like_delta(),
                views: bucket.view_delta,
                comments: bucket.comment_delta,
                content_id,
            })
            .collect();
        deltas.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        deltas
    }

    /// Throw away everything buffered, e.g. before a rewind.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.events = 0;
    }
}
