//! Shared kernel - Common types used across the session core

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::{CaptureError, SessionError, SignalingError, TransportError};
pub use result::Result;
pub use value_objects::*;
