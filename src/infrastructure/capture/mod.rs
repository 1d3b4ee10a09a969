//! Local audio acquisition
//!
//! Prefers a system-loopback/monitor device (the desktop analog of a
//! tab or window share with audio) and falls back to the default
//! microphone. Produces an ownership-exclusive `MediaSource`.

pub mod cpal_impl;

pub use cpal_impl::CpalAudioCapture;

use crate::domain::media::MediaSource;
use crate::domain::shared::error::CaptureError;
use async_trait::async_trait;

/// Acquires the one local audio source a session may own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn capture_system_audio(&self) -> Result<MediaSource, CaptureError>;
}
