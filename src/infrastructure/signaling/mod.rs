//! Signaling side channel
//!
//! A bidirectional, at-least-once message channel scoped to one session
//! id, built atop a shared rendezvous service. Production uses a
//! WebSocket client; tests inject an in-memory broker.

pub mod broker;
pub mod message;
pub mod websocket;

pub use broker::InMemoryBroker;
pub use message::{CandidatePayload, DescriptionKind, SessionDescription, SignalingMessage};
pub use websocket::WebSocketConnector;

use crate::domain::shared::error::SignalingError;
use crate::domain::shared::value_objects::{PeerRole, SessionId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Notification delivered by an open channel, in receipt order.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// A control message from the counterpart.
    Message(SignalingMessage),
    /// The rendezvous service reports a second participant attached.
    /// The initiator uses this as the trigger to originate its offer.
    PeerJoined,
    /// The rendezvous link dropped and could not be re-established.
    Lost(SignalingError),
}

/// An open side channel to exactly one counterpart.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Fire-and-forget; no delivery acknowledgment is surfaced.
    async fn send(&self, message: SignalingMessage);

    /// Detach from the session. Safe to call once the peer is gone.
    async fn close(&self);
}

/// Opens channels against the rendezvous service.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn open(
        &self,
        session_id: &SessionId,
        role: PeerRole,
    ) -> Result<
        (
            Box<dyn SignalingChannel>,
            mpsc::UnboundedReceiver<SignalingEvent>,
        ),
        SignalingError,
    >;
}
