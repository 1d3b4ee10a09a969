//! Session lifecycle events
//!
//! The only three notifications the presentation layer may depend on.
//! Subscription is established once, at construction; there are no
//! reassignable callback fields.

use crate::domain::media::RemoteStream;
use crate::domain::session::value_object::ConnectionState;
use crate::domain::shared::error::SessionError;
use tokio::sync::broadcast;
use tracing::debug;

/// Outward-facing session notification.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state.
    StateChanged { state: ConnectionState },
    /// The remote peer's audio is available for play-out (joiner side).
    RemoteStreamAvailable { stream: RemoteStream },
    /// A failure was surfaced; `error.kind()` selects the remediation.
    Error { error: SessionError },
}

/// Broadcast fan-out for session events.
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("session event emitted with no subscribers");
        }
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(SessionEvent::StateChanged { state });
    }

    pub fn remote_stream(&self, stream: RemoteStream) {
        self.emit(SessionEvent::RemoteStreamAvailable { stream });
    }

    pub fn error(&self, error: SessionError) {
        self.emit(SessionEvent::Error { error });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
