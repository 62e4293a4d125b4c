//! Event types and EventBus for jukebot playback notifications
//!
//! Provides the shared event definitions consumed by the command/UI layer.

use crate::types::{PlayResource, QueueItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for
/// transmission to remote subscribers. Stale events from superseded
/// preparation attempts are filtered out before emission, so subscribers
/// never observe notifications for an attempt that lost its slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlaybackEvent {
    /// Raised immediately before the player is asked to start a resource.
    ///
    /// Carries the same payload as `AfterResourceStarted` so subscribers
    /// observing only one of the two still get consistent data.
    BeforeResourceStarted {
        /// Chat uid of the requesting user, if any
        invoker: Option<String>,
        /// The resolved resource about to start
        resource: PlayResource,
        /// Human-facing source URL
        source_url: String,
        /// When the notification was raised
        timestamp: DateTime<Utc>,
    },

    /// Raised immediately after the player accepted a resource.
    AfterResourceStarted {
        /// Chat uid of the requesting user, if any
        invoker: Option<String>,
        /// The resolved resource that started
        resource: PlayResource,
        /// Human-facing source URL
        source_url: String,
        /// When the notification was raised
        timestamp: DateTime<Utc>,
    },

    /// The playing resource stopped.
    ResourceStopped {
        /// True when a user command stopped it, false when it ran out
        explicit: bool,
        /// When playback stopped
        timestamp: DateTime<Utc>,
    },

    /// Playback ran off the end of the queue.
    PlaybackStopped {
        /// The staged prefetch entry that never became current, if any
        shadow_next: Option<QueueItem>,
        /// When playback stopped
        timestamp: DateTime<Utc>,
    },

    /// Metadata of the playing resource changed after it started.
    ResourceUpdated {
        /// New display title
        title: String,
        /// When the change was observed
        timestamp: DateTime<Utc>,
    },

    /// Queue contents changed.
    QueueChanged {
        /// Queue length after the change
        len: usize,
        /// When the queue changed
        timestamp: DateTime<Utc>,
    },

    /// The queue cursor moved.
    QueueIndexChanged {
        /// Cursor position after the move
        index: usize,
        /// When the cursor moved
        timestamp: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    /// Event type name, as used in the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            PlaybackEvent::BeforeResourceStarted { .. } => "BeforeResourceStarted",
            PlaybackEvent::AfterResourceStarted { .. } => "AfterResourceStarted",
            PlaybackEvent::ResourceStopped { .. } => "ResourceStopped",
            PlaybackEvent::PlaybackStopped { .. } => "PlaybackStopped",
            PlaybackEvent::ResourceUpdated { .. } => "ResourceUpdated",
            PlaybackEvent::QueueChanged { .. } => "QueueChanged",
            PlaybackEvent::QueueIndexChanged { .. } => "QueueIndexChanged",
        }
    }
}

/// Central event distribution bus for playback events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// Delivery order per subscriber is emission order.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    ///
    /// `capacity` is the number of events buffered per subscriber before
    /// old events are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` when nobody is listening.
    pub fn emit(
        &self,
        event: PlaybackEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PlaybackEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening.
    pub fn emit_lossy(&self, event: PlaybackEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("playback event emitted with no subscribers");
        }
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventbus_delivers_to_all_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(PlaybackEvent::ResourceStopped {
            explicit: true,
            timestamp: Utc::now(),
        })
        .expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "ResourceStopped");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "ResourceStopped");
    }

    #[test]
    fn eventbus_emit_lossy_without_subscribers() {
        let bus = EventBus::new(2);
        // No subscribers; must not panic or error
        bus.emit_lossy(PlaybackEvent::QueueChanged {
            len: 0,
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = PlaybackEvent::QueueIndexChanged {
            index: 3,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).expect("serialization should succeed");
        assert!(json.contains("\"type\":\"QueueIndexChanged\""));
        assert!(json.contains("\"index\":3"));
    }
}
