//! # Event Bus System
//!
//! Lifecycle notifications for the media stream host, built on a broadcast
//! channel.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`PlaybackEvent`], one variant per lifecycle step
//! - **EventBus**: broadcast channel the engine publishes on
//! - **EventStream**: wrapper for consuming events with filtering
//!
//! ```text
//! ┌────────┐    emit     ┌───────────┐    subscribe    ┌────────────┐
//! │ Engine ├────────────>│ EventBus  ├────────────────>│ Subscriber │
//! └────────┘             │ (broadcast│                 └────────────┘
//!                        │  channel) ├────────────────>┌────────────┐
//!                        └───────────┘                 │ Subscriber │
//!                                                      └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, PlaybackEvent};
//!
//! let event_bus = EventBus::new(16);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(PlaybackEvent::SessionStarted { session: 1 }).ok();
//! assert_eq!(
//!     subscriber.try_recv().unwrap(),
//!     PlaybackEvent::SessionStarted { session: 1 }
//! );
//! ```
//!
//! ## Guarantees
//!
//! - `SessionStopped` is published exactly once per session, by the stop
//!   that removed it from the registry.
//! - `SessionFailed` is published once per failure, at its origin.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind. Non-fatal.
//! - **`RecvError::Closed`**: the engine was dropped.
//!
//! Emitting with no subscribers is not an error for the engine; it ignores
//! the `SendError`.

use core_async::sync::broadcast;
use core_ffi::{DecoderKind, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Lifecycle events published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A container passed capability validation.
    Loaded { has_audio: bool, has_video: bool },
    /// A session was registered and the core told to start it.
    SessionStarted { session: SessionId },
    /// A decoder was constructed, configured and reported to the core.
    DecoderCreated {
        session: SessionId,
        kind: DecoderKind,
    },
    /// A decoder was closed by a close routine.
    DecoderClosed {
        session: SessionId,
        kind: DecoderKind,
    },
    /// The core reported the end of the stream for a session.
    EndOfStream { session: SessionId },
    /// A session was removed from the registry and its teardown finished.
    SessionStopped { session: SessionId },
    /// An asynchronous command or decoder callback failed.
    SessionFailed {
        session: Option<SessionId>,
        message: String,
    },
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl PlaybackEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loaded { .. } => "Container loaded",
            PlaybackEvent::SessionStarted { .. } => "Session started",
            PlaybackEvent::DecoderCreated { .. } => "Decoder created",
            PlaybackEvent::DecoderClosed { .. } => "Decoder closed",
            PlaybackEvent::EndOfStream { .. } => "End of stream",
            PlaybackEvent::SessionStopped { .. } => "Session stopped",
            PlaybackEvent::SessionFailed { .. } => "Session failed",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            PlaybackEvent::SessionFailed { .. } => EventSeverity::Error,
            PlaybackEvent::Loaded { .. }
            | PlaybackEvent::SessionStarted { .. }
            | PlaybackEvent::SessionStopped { .. } => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// The session this event concerns, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            PlaybackEvent::Loaded { .. } => None,
            PlaybackEvent::SessionStarted { session }
            | PlaybackEvent::DecoderCreated { session, .. }
            | PlaybackEvent::DecoderClosed { session, .. }
            | PlaybackEvent::EndOfStream { session }
            | PlaybackEvent::SessionStopped { session } => Some(*session),
            PlaybackEvent::SessionFailed { session, .. } => *session,
        }
    }
}

/// Central event bus for publishing and subscribing to events.
///
/// Clones publish on the same channel. Each `subscribe()` creates an
/// independent receiver that sees every event emitted after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: PlaybackEvent) -> Result<usize, SendError<PlaybackEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&PlaybackEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, PlaybackEvent};
///
/// let event_bus = EventBus::new(16);
/// let mut stream = EventStream::new(event_bus.subscribe()).for_session(2);
///
/// event_bus.emit(PlaybackEvent::SessionStarted { session: 1 }).ok();
/// event_bus.emit(PlaybackEvent::SessionStarted { session: 2 }).ok();
///
/// let event = stream.try_recv().unwrap().unwrap();
/// assert_eq!(event.session(), Some(2));
/// ```
pub struct EventStream {
    receiver: Receiver<PlaybackEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<PlaybackEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PlaybackEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events concerning `session` are returned.
    pub fn for_session(self, session: SessionId) -> Self {
        self.filter(move |event| event.session() == Some(session))
    }

    fn matches(&self, event: &PlaybackEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Wait for the next event that passes the filter.
    ///
    /// Lagging and closure are reported as by the underlying receiver.
    pub async fn recv(&mut self) -> Result<PlaybackEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// The next buffered event that passes the filter, without waiting.
    ///
    /// `None` once the buffer holds no matching event.
    pub fn try_recv(&mut self) -> Option<Result<PlaybackEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(skipped)) => return Some(Err(RecvError::Lagged(skipped))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.matches(&event) {
                return Some(Ok(event));
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
