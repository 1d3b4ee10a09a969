//! Session aggregate root
//!
//! Enforces the connection lifecycle: forward-only transitions, fixed
//! role, terminal close/fail.

use crate::domain::session::value_object::ConnectionState;
use crate::domain::shared::error::{SessionError, SignalingError};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{PeerRole, SessionId};
use chrono::{DateTime, Utc};

/// The logical pairing between two participants.
///
/// Not persisted; a session lives exactly as long as one attempt and is
/// re-created from scratch for the next.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    role: PeerRole,
    state: ConnectionState,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Host a new session with a self-generated id.
    pub fn initiate() -> Self {
        Self::with_id(SessionId::generate(), PeerRole::Initiator)
    }

    /// Join a session under an externally supplied id.
    pub fn join(id: SessionId) -> Self {
        Self::with_id(id, PeerRole::Joiner)
    }

    fn with_id(id: SessionId, role: PeerRole) -> Self {
        Self {
            id,
            role,
            state: ConnectionState::Idle,
            created_at: Utc::now(),
            connected_at: None,
            closed_at: None,
        }
    }

    /// Initiator starts acquiring the local audio source.
    pub fn begin_capture(&mut self) -> Result<()> {
        if !self.role.is_initiator() {
            return Err(SessionError::Signaling(SignalingError::SequenceViolation(
                "only the initiator captures audio".to_string(),
            )));
        }
        self.transition_to(ConnectionState::Capturing)
    }

    /// Capture succeeded; the session id is published and the channel opens.
    pub fn await_peer(&mut self) -> Result<()> {
        self.transition_to(ConnectionState::AwaitingPeer)
    }

    /// Offer/answer exchange begins.
    pub fn begin_negotiation(&mut self) -> Result<()> {
        self.transition_to(ConnectionState::Negotiating)
    }

    /// Transport reports an established media path.
    pub fn mark_connected(&mut self) -> Result<()> {
        self.transition_to(ConnectionState::Connected)?;
        self.connected_at = Some(Utc::now());
        Ok(())
    }

    /// Orderly teardown. No-op once terminal.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectionState::Closed;
            self.closed_at = Some(Utc::now());
        }
    }

    /// Unrecoverable failure. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConnectionState::Failed;
            self.closed_at = Some(Utc::now());
        }
    }

    fn transition_to(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::Signaling(SignalingError::SequenceViolation(
                format!("cannot transition from {} to {}", self.state, next),
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}
