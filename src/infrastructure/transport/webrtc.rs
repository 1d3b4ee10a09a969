//! WebRTC media transport
//!
//! Wraps an `RTCPeerConnection` behind the transport seam. Trickle ICE:
//! descriptions are returned as soon as they are committed locally and
//! candidates flow through signaling as they are gathered.

use crate::config::IceConfig;
use crate::domain::media::{MediaFrame, RemoteStream};
use crate::domain::shared::error::TransportError;
use crate::infrastructure::signaling::{CandidatePayload, DescriptionKind, SessionDescription};
use crate::infrastructure::transport::{
    MediaTransport, TransportEvent, TransportFactory, TransportState,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// Nominal play-out duration for remote frames; actual pacing is driven
// by RTP timestamps inside the transport.
const REMOTE_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Builds `webrtc`-crate transports from the configured ICE servers.
pub struct WebRtcTransportFactory {
    ice: IceConfig,
}

impl WebRtcTransportFactory {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice
            .servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        outbound: Option<mpsc::Receiver<MediaFrame>>,
    ) -> Result<
        (
            Box<dyn MediaTransport>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
        TransportError,
    > {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(to_transport_error)?;
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(to_transport_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(to_transport_error)?,
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let candidate_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("local candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(TransportEvent::LocalCandidate(CandidatePayload {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!(error = %e, "local candidate not serializable"),
                }
            })
        }));

        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = state_tx.send(TransportEvent::StateChanged(map_state(state)));
            Box::pin(async {})
        }));

        let track_tx = event_tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let track_tx = track_tx.clone();
                Box::pin(async move {
                    let (frame_tx, frame_rx) = mpsc::channel(4096);
                    let _ = track_tx.send(TransportEvent::RemoteStreamAvailable(RemoteStream::new(
                        frame_rx,
                    )));
                    tokio::spawn(async move {
                        while let Ok((packet, _)) = track.read_rtp().await {
                            let frame = MediaFrame::new(packet.payload, REMOTE_FRAME_DURATION);
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        debug!("remote track ended");
                    });
                })
            },
        ));

        if let Some(frames) = outbound {
            attach_outbound_track(&pc, frames).await?;
        }

        Ok((Box::new(WebRtcTransport { pc }), event_rx))
    }
}

/// Add the local audio track and pump captured frames into it.
async fn attach_outbound_track(
    pc: &Arc<RTCPeerConnection>,
    mut frames: mpsc::Receiver<MediaFrame>,
) -> Result<(), TransportError> {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_owned(),
        "earshot".to_owned(),
    ));

    let rtp_sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(to_transport_error)?;

    // Drain RTCP so the interceptors keep running.
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
    });

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let sample = Sample {
                data: frame.data,
                duration: frame.duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "stopping outbound audio pump");
                break;
            }
        }
        debug!("outbound audio source drained");
    });

    Ok(())
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_transport_error)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(to_transport_error)?;
        Ok(SessionDescription::offer(sdp))
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
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(to_transport_error)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(to_transport_error)?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_transport_error)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(to_transport_error)?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        if answer.kind != DescriptionKind::Answer {
            return Err(TransportError::NegotiationFailed(
                "remote description is not an answer".to_string(),
            ));
        }
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(to_transport_error)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(to_transport_error)
    }

    async fn add_remote_candidate(
        &self,
        candidate: CandidatePayload,
    ) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(to_transport_error)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close reported an error");
        }
    }
}

fn map_state(state: RTCPeerConnectionState) -> TransportState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportState::New,
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
    }
}

fn to_transport_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::NegotiationFailed(e.to_string())
}
