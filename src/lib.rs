//! Earshot - peer-to-peer system audio streaming
//!
//! One device captures local audio and streams it directly to a second
//! device; a rendezvous service is used only to exchange connection
//! metadata and never carries audio. The core of the crate is the
//! session negotiation and connection-lifecycle state machine in
//! [`application::negotiator`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::negotiator::SessionNegotiator;
pub use config::Config;
pub use domain::media::{MediaFrame, MediaSource, RemoteStream};
pub use domain::session::event::SessionEvent;
pub use domain::session::value_object::ConnectionState;
pub use domain::shared::error::{CaptureError, SessionError, SignalingError, TransportError};
pub use domain::shared::result::Result;
pub use domain::shared::value_objects::{PeerRole, SessionId, ShareLink};
