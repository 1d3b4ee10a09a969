//! Session error taxonomy
//!
//! Each family maps to one stage of the session lifecycle so the
//! presentation layer can show source-specific remediation.

use thiserror::Error;

/// Failures while acquiring a local audio source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("audio capture unsupported: {0}")]
    Unsupported(String),

    #[error("insecure context: {0}")]
    InsecureContext(String),

    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("no audio track available: {0}")]
    NoAudioTrack(String),
}

/// Failures on the rendezvous side channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("rendezvous service unreachable: {0}")]
    RendezvousUnreachable(String),

    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("signaling sequence violation: {0}")]
    SequenceViolation(String),
}

/// Failures on the negotiated media path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("connectivity lost: {0}")]
    ConnectivityLost(String),
}

/// Any failure a session can surface to its subscribers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Stable kind tag for presentation-side dispatch.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Capture(_) => "capture",
            SessionError::Signaling(_) => "signaling",
            SessionError::Transport(_) => "transport",
        }
    }
}
