//! Interaction events - the wire payload carried from the outbox to the consumer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{unix_millis, Clock, SystemClock};

/// The kinds of interaction a reader can have with a content item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InteractionKind {
    View,
    Like,
    Unlike,
    Comment,
}

impl InteractionKind {
    /// Anonymous interactions are only allowed for views.
    pub fn requires_actor(self) -> bool {
        !matches!(self, InteractionKind::View)
    }
}

/// An interaction with a content item, as published to the stream.
///
/// Serialized as JSON:
///
/// ```
/// use interaction_pipeline::InteractionEvent;
///
/// let event = InteractionEvent::from_json(
///     br#"{"type":"LIKE","contentId":"post-1","actorId":"u-1","timestamp":1700000000000}"#,
/// ).unwrap();
/// assert_eq!(event.content_id, "post-1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub content_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Errors raised while decoding an interaction payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a valid interaction: {0}")]
    Json(#[from] serde_json::Error),
    #[error("interaction has an empty content id")]
    MissingContentId,
    #[error("{0:?} interaction requires an actor")]
    MissingActor(InteractionKind),
}

impl InteractionEvent {
    pub fn new(
        kind: InteractionKind,
        content_id: impl Into<String>,
        actor_id: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            content_id: content_id.into(),
            actor_id,
            timestamp,
        }
    }

    fn now(kind: InteractionKind, content_id: impl Into<String>, actor_id: Option<String>) -> Self {
        Self::new(kind, content_id, actor_id, unix_millis(SystemClock.now()))
    }

    /// A view, optionally anonymous.
    pub fn view(content_id: impl Into<String>, actor_id: Option<&str>) -> Self {
        Self::now(InteractionKind::View, content_id, actor_id.map(String::from))
    }

    pub fn like(content_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::now(InteractionKind::Like, content_id, Some(actor_id.into()))
    }

    pub fn unlike(content_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::now(InteractionKind::Unlike, content_id, Some(actor_id.into()))
    }

    pub fn comment(content_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::now(InteractionKind::Comment, content_id, Some(actor_id.into()))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode and validate a payload pulled off the stream.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let event: InteractionEvent = serde_json::from_slice(bytes)?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.content_id.trim().is_empty() {
            return Err(DecodeError::MissingContentId);
        }
        let has_actor = self
            .actor_id
            .as_deref()
            .is_some_and(|actor| !actor.trim().is_empty());
        if self.kind.requires_actor() && !has_actor {
            return Err(DecodeError::MissingActor(self.kind));
        }
        Ok(())
    }
}
