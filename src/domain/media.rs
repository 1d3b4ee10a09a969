//! Media primitives shared between capture and transport
//!
//! Frames are carried as opaque payloads; encoding is delegated to the
//! transport's codec and never inspected here.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

/// One chunk of audio with its play-out duration.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl MediaFrame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }

    /// Pack interleaved i16 PCM into a frame, little-endian.
    pub fn from_pcm_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        let frames = samples.len() / channels.max(1) as usize;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
        Self {
            data: Bytes::from(data),
            duration,
        }
    }
}

/// Where a captured source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// System output mirrored by a loopback/monitor device.
    SystemLoopback,
    /// Direct microphone capture, the fallback path.
    Microphone,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::SystemLoopback => write!(f, "system loopback"),
            SourceKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// Ownership-exclusive handle to a local audio-producing capture.
///
/// Owned solely by the initiator's session; stopping is idempotent and
/// also happens on drop so the backing device is never retained past
/// session teardown.
pub struct MediaSource {
    label: String,
    kind: SourceKind,
    frames: Option<mpsc::Receiver<MediaFrame>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MediaSource {
    pub fn new(
        label: impl Into<String>,
        kind: SourceKind,
        frames: mpsc::Receiver<MediaFrame>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            frames: Some(frames),
            shutdown: Some(shutdown),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Hand the frame stream to a transport. Yields `None` once taken;
    /// a source feeds at most one transport.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<MediaFrame>> {
        self.frames.take()
    }

    /// Stop the backing capture. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.frames = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Playable handle to the remote peer's audio, surfaced on the joiner
/// side once the transport delivers a track.
///
/// Cloning shares the underlying frame stream; each frame is consumed
/// by exactly one reader.
#[derive(Clone)]
pub struct RemoteStream {
    id: Uuid,
    frames: Arc<Mutex<mpsc::Receiver<MediaFrame>>>,
}

impl RemoteStream {
    pub fn new(frames: mpsc::Receiver<MediaFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            frames: Arc::new(Mutex::new(frames)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next audio frame, or `None` once the remote side stopped sending.
    pub async fn next_frame(&self) -> Option<MediaFrame> {
        self.frames.lock().await.recv().await
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_frame_duration() {
        // 960 stereo sample pairs at 48 kHz = 20 ms
        let samples = vec![0i16; 1920];
        let frame = MediaFrame::from_pcm_i16(&samples, 48_000, 2);
        assert_eq!(frame.data.len(), 1920 * 2);
        assert_eq!(frame.duration, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_media_source_stop_is_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut source = MediaSource::new("test", SourceKind::Microphone, rx, shutdown_tx);

        assert!(!source.is_stopped());
        source.stop();
        source.stop();
        assert!(source.is_stopped());
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_media_source_frames_taken_once() {
        let (_tx, rx) = mpsc::channel(1);
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let mut source = MediaSource::new("test", SourceKind::SystemLoopback, rx, shutdown_tx);

        assert!(source.take_frames().is_some());
        assert!(source.take_frames().is_none());
    }

    #[tokio::test]
    async fn test_remote_stream_delivers_frames() {
        let (tx, rx) = mpsc::channel(4);
        let stream = RemoteStream::new(rx);

        tx.send(MediaFrame::new(Bytes::from_static(b"pcm"), Duration::from_millis(20)))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(stream.next_frame().await.unwrap().data.as_ref(), b"pcm");
        assert!(stream.next_frame().await.is_none());
    }
}
