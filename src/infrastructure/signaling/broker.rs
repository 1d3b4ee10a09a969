//! In-memory rendezvous broker
//!
//! Fans messages out among participants of the same process. Built for
//! tests and local demos; always constructed and injected explicitly,
//! never held in process-wide state.

use crate::domain::shared::error::SignalingError;
use crate::domain::shared::value_objects::{PeerRole, SessionId};
use crate::infrastructure::signaling::{
    SignalingChannel, SignalingConnector, SignalingEvent, SignalingMessage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

#[derive(Default)]
struct Room {
    members: Vec<Member>,
}

/// Shared broker state; clone to hand the same rendezvous to several
/// participants.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    next_member: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of participants currently attached to a session.
    pub async fn occupancy(&self, session_id: &SessionId) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(session_id.as_str())
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SignalingConnector for InMemoryBroker {
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
    > {
        let member_id = self.next_member.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(session_id.as_str().to_string()).or_default();

        // The service notifies existing participants, not the newcomer.
        for member in &room.members {
            let _ = member.tx.send(SignalingEvent::PeerJoined);
        }
        room.members.push(Member { id: member_id, tx });

        debug!(
            session_id = %session_id,
            %role,
            member_id,
            "attached to in-memory rendezvous room"
        );

        let channel = BrokerChannel {
            rooms: self.rooms.clone(),
            session_id: session_id.as_str().to_string(),
            member_id,
        };
        Ok((Box::new(channel), rx))
    }
}

struct BrokerChannel {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    session_id: String,
    member_id: u64,
}

#[async_trait]
impl SignalingChannel for BrokerChannel {
    async fn send(&self, message: SignalingMessage) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(&self.session_id) else {
            debug!(session_id = %self.session_id, "send into vanished room dropped");
            return;
        };
        for member in room.members.iter().filter(|m| m.id != self.member_id) {
            let _ = member.tx.send(SignalingEvent::Message(message.clone()));
        }
    }

    async fn close(&self) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&self.session_id) {
            room.members.retain(|m| m.id != self.member_id);
            if room.members.is_empty() {
                rooms.remove(&self.session_id);
            }
        }
    }
}
