//! Negotiated media path
//!
//! The session owns exactly one transport at a time and only ever sees
//! this seam: offer/answer primitives, candidate application, a state
//! stream, and close. Production rides the `webrtc` crate; tests
//! inject scripted implementations.

pub mod webrtc;

pub use self::webrtc::WebRtcTransportFactory;

use crate::domain::media::{MediaFrame, RemoteStream};
use crate::domain::shared::error::TransportError;
use crate::infrastructure::signaling::{CandidatePayload, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Connectivity state of the media path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    /// Transient loss; the transport may still recover on its own.
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Notification from an active transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A locally gathered candidate to relay to the counterpart.
    LocalCandidate(CandidatePayload),
    StateChanged(TransportState),
    /// The remote peer's audio arrived (answerer side).
    RemoteStreamAvailable(RemoteStream),
}

/// One negotiated media path between the two participants.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Produce the local offer and commit it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply the remote offer and produce the answer.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    /// Apply the remote answer to a previously offered transport.
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    /// Candidates are applied whenever they arrive, in arrival order.
    async fn add_remote_candidate(&self, candidate: CandidatePayload)
        -> Result<(), TransportError>;

    /// Tear the path down. Safe to call on an already-closed transport.
    async fn close(&self);
}

/// Creates a transport per negotiation attempt.
///
/// The offerer hands over its outbound frame stream; the answerer
/// passes `None` and receives media through `RemoteStreamAvailable`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        outbound: Option<mpsc::Receiver<MediaFrame>>,
    ) -> Result<
        (
            Box<dyn MediaTransport>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
        TransportError,
    >;
}
