//! Signaling wire messages
//!
//! Small JSON control messages relayed between exactly two
//! participants. Offer must precede Answer; candidates may arrive in
//! any order and any quantity, before or after either.

use serde::{Deserialize, Serialize};

/// SDP description kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Transport parameters produced by one side of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One ICE candidate as carried over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Control message exchanged through the rendezvous side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Joiner announces its presence in the session.
    Join,
    Offer { payload: SessionDescription },
    Answer { payload: SessionDescription },
    IceCandidate { payload: CandidatePayload },
    /// Orderly departure of either side.
    Leave,
}

impl SignalingMessage {
    /// Message kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Join => "join",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::Leave => "leave",
        }
    }
}
