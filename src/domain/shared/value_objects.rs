//! Shared value objects used across the session core

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SESSION_ID_LEN: usize = 13;

/// Opaque session identifier.
///
/// Treated as a capability token: anyone holding it can attempt to join
/// the session, so it carries enough randomness to avoid rendezvous
/// collisions but no further meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an externally supplied identifier (e.g. taken from a share link).
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() || token.chars().any(|c| c.is_whitespace()) {
            return None;
        }
        Some(Self(token))
    }

    /// Self-generate a fresh identifier, initiator side.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let token: String = (0..SESSION_ID_LEN)
            .map(|_| SESSION_ID_ALPHABET[rng.gen_range(0..SESSION_ID_ALPHABET.len())] as char)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Participant role, fixed for the lifetime of a session.
///
/// Determined at creation by whether a session id was supplied
/// externally: no id means we host and originate the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Initiator,
    Joiner,
}

impl PeerRole {
    pub fn is_initiator(&self) -> bool {
        matches!(self, PeerRole::Initiator)
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Initiator => write!(f, "initiator"),
            PeerRole::Joiner => write!(f, "joiner"),
        }
    }
}

/// Shareable URL carrying a session id as a `?room=` query parameter.
///
/// A pure projection of the session id; parsing also accepts the `#r=`
/// fragment form so older share links keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    url: String,
    session_id: SessionId,
}

impl ShareLink {
    pub fn new(base_url: &str, session_id: &SessionId) -> Self {
        let base = base_url.trim_end_matches('/');
        let url = format!("{}?room={}", base, session_id);
        Self {
            url,
            session_id: session_id.clone(),
        }
    }

    /// Extract the session id from a share link, if it carries one.
    pub fn parse(url: &str) -> Option<SessionId> {
        if let Some((_, fragment)) = url.split_once('#') {
            if let Some(id) = fragment.strip_prefix("r=") {
                return SessionId::new(id);
            }
        }
        let (_, query) = url.split_once('?')?;
        let query = query.split('#').next().unwrap_or(query);
        for pair in query.split('&') {
            if let Some(id) = pair.strip_prefix("room=") {
                return SessionId::new(id);
            }
        }
        None
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
