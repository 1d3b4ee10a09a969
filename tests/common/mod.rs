//! Shared fakes and helpers for integration tests
//!
//! The broker stands in for the rendezvous service; transports are
//! scripted so a handshake completes without touching the network or
//! any audio device.

use bytes::Bytes;
use earshot::domain::media::{MediaFrame, MediaSource, RemoteStream, SourceKind};
use earshot::domain::session::event::SessionEvent;
use earshot::domain::session::value_object::ConnectionState;
use earshot::domain::shared::error::{CaptureError, SessionError, SignalingError, TransportError};
use earshot::domain::shared::value_objects::{PeerRole, SessionId};
use earshot::infrastructure::capture::AudioCapture;
use earshot::infrastructure::signaling::{
    CandidatePayload, DescriptionKind, InMemoryBroker, SessionDescription, SignalingChannel,
    SignalingConnector, SignalingEvent, SignalingMessage,
};
use earshot::infrastructure::transport::{
    MediaTransport, TransportEvent, TransportFactory, TransportState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

pub const FAKE_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Capture that always succeeds with a silent source and records when
/// the session releases it.
pub struct FakeCapture {
    released: Arc<AtomicBool>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn release_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

#[async_trait::async_trait]
impl AudioCapture for FakeCapture {
    async fn capture_system_audio(&self) -> Result<MediaSource, CaptureError> {
        let (_frame_tx, frame_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let released = self.released.clone();
        tokio::spawn(async move {
            // Fires on stop() and on drop alike.
            let _ = shutdown_rx.await;
            released.store(true, Ordering::SeqCst);
        });
        Ok(MediaSource::new(
            "fake loopback",
            SourceKind::SystemLoopback,
            frame_rx,
            shutdown_tx,
        ))
    }
}

/// What a scripted transport observed.
#[derive(Default)]
pub struct FakeTransportLog {
    pub applied_candidates: Mutex<Vec<CandidatePayload>>,
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub closed: AtomicBool,
}

/// Factory producing transports that "connect" as soon as both
/// descriptions are in place: the answerer inside `accept_offer`, the
/// offerer when the answer is applied.
pub struct FakeTransportFactory {
    log: Arc<FakeTransportLog>,
    local_candidates: usize,
}

impl FakeTransportFactory {
    pub fn new(local_candidates: usize) -> (Self, Arc<FakeTransportLog>) {
        let log = Arc::new(FakeTransportLog::default());
        (
            Self {
                log: log.clone(),
                local_candidates,
            },
            log,
        )
    }
}

#[async_trait::async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _outbound: Option<mpsc::Receiver<MediaFrame>>,
    ) -> Result<
        (
            Box<dyn MediaTransport>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
        TransportError,
    > {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = FakeTransport {
            log: self.log.clone(),
            events: event_tx,
            local_candidates: self.local_candidates,
        };
        Ok((Box::new(transport), event_rx))
    }
}

struct FakeTransport {
    log: Arc<FakeTransportLog>,
    events: mpsc::UnboundedSender<TransportEvent>,
    local_candidates: usize,
}

impl FakeTransport {
    fn emit_local_candidates(&self) {
        for index in 0..self.local_candidates {
            let _ = self
                .events
                .send(TransportEvent::LocalCandidate(CandidatePayload {
                    candidate: format!(
                        "candidate:{index} 1 udp 2130706431 198.51.100.1 500{index} typ host"
                    ),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                }));
        }
    }
}

#[async_trait::async_trait]
impl MediaTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.log.offers_created.fetch_add(1, Ordering::SeqCst);
        self.emit_local_candidates();
        Ok(SessionDescription::offer(FAKE_SDP))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if offer.kind != DescriptionKind::Offer {
            return Err(TransportError::NegotiationFailed(
                "remote description is not an offer".to_string(),
            ));
        }
        self.log.answers_created.fetch_add(1, Ordering::SeqCst);
        self.emit_local_candidates();
        let _ = self
            .events
            .send(TransportEvent::StateChanged(TransportState::Connected));

        let (frame_tx, frame_rx) = mpsc::channel(4);
        let _ = frame_tx.try_send(MediaFrame::new(
            Bytes::from_static(&[0u8; 64]),
            Duration::from_millis(20),
        ));
        let _ = self.events.send(TransportEvent::RemoteStreamAvailable(
            RemoteStream::new(frame_rx),
        ));

        Ok(SessionDescription::answer(FAKE_SDP))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        if answer.kind != DescriptionKind::Answer {
            return Err(TransportError::NegotiationFailed(
                "remote description is not an answer".to_string(),
            ));
        }
        let _ = self
            .events
            .send(TransportEvent::StateChanged(TransportState::Connected));
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        candidate: CandidatePayload,
    ) -> Result<(), TransportError> {
        self.log
            .applied_candidates
            .lock()
            .unwrap()
            .push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// Broker wrapper that swallows the initiator's offer triggers
/// (peer-joined notifications and join messages), pinning it in
/// `AwaitingPeer` so out-of-sequence messages can be injected.
#[derive(Clone)]
pub struct QuietConnector {
    pub inner: InMemoryBroker,
}

#[async_trait::async_trait]
impl SignalingConnector for QuietConnector {
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
        let (channel, mut events) = self.inner.open(session_id, role).await?;
        let (tx, filtered) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let suppressed = matches!(
                    &event,
                    SignalingEvent::PeerJoined
                        | SignalingEvent::Message(SignalingMessage::Join)
                );
                if !suppressed && tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok((channel, filtered))
    }
}

pub async fn wait_for_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    target: ConnectionState,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged { state }) if state == target => return,
                Ok(_) => {}
                Err(e) => panic!("event stream ended early: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {target}"));
}

pub async fn wait_for_error(events: &mut broadcast::Receiver<SessionEvent>) -> SessionError {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Error { error }) => return error,
                Ok(_) => {}
                Err(e) => panic!("event stream ended early: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for an error event")
}

pub async fn wait_for_remote_stream(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> RemoteStream {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::RemoteStreamAvailable { stream }) => return stream,
                Ok(_) => {}
                Err(e) => panic!("event stream ended early: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for the remote stream")
}
