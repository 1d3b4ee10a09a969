//! Session state values

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle state.
///
/// Sessions only move forward; `Closed` and `Failed` are terminal and a
/// session is never resurrected out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    /// Acquiring the local audio source (initiator only).
    Capturing,
    /// Session id published, waiting for a counterpart to attach.
    AwaitingPeer,
    /// Offer/answer/candidate exchange in flight.
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Whether moving to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (*self, next) {
            (current, next) if current == next => false,
            (current, Failed) | (current, Closed) => !current.is_terminal(),
            (Idle, Capturing) => true,
            // Joiner path: opens the channel against a known id and waits
            // for the offer without ever capturing.
            (Idle, Negotiating) => true,
            (Capturing, AwaitingPeer) => true,
            (AwaitingPeer, Negotiating) => true,
            (Negotiating, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Capturing => "capturing",
            ConnectionState::AwaitingPeer => "awaiting_peer",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}
