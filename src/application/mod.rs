//! Application layer - Use cases and orchestration
//!
//! Coordinates the domain aggregates with capture, signaling, and
//! transport infrastructure, and publishes lifecycle events outward.

pub mod negotiator;

pub use negotiator::SessionNegotiator;
