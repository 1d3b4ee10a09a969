//! Session negotiator
//!
//! Orchestrates one session end to end: role assignment, capture,
//! session-id allocation, offer/answer/candidate exchange through the
//! signaling channel, transport establishment, and teardown.
//!
//! All mutable session state lives in a single driver task; signaling
//! events, capture completion, transport notifications and the
//! negotiation deadline arrive on one `select!` loop, so no locking is
//! needed inside a session. The public handle talks to the driver over
//! a command channel and observes it through a broadcast subscription
//! fixed at construction.

use crate::config::Config;
use crate::domain::media::MediaFrame;
use crate::domain::session::aggregate::Session;
use crate::domain::session::event::{SessionEvent, SessionEvents};
use crate::domain::session::value_object::ConnectionState;
use crate::domain::shared::error::{CaptureError, SessionError, TransportError};
use crate::domain::shared::value_objects::{PeerRole, SessionId, ShareLink};
use crate::infrastructure::capture::AudioCapture;
use crate::infrastructure::signaling::{
    CandidatePayload, SessionDescription, SignalingChannel, SignalingConnector, SignalingEvent,
    SignalingMessage,
};
use crate::infrastructure::transport::{
    MediaTransport, TransportEvent, TransportFactory, TransportState,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Command {
    Start,
    Disconnect { done: oneshot::Sender<()> },
}

/// Public handle to one streaming session.
///
/// The underlying role is fixed at construction by the presence of an
/// externally supplied session id; there is no in-band renegotiation.
pub struct SessionNegotiator {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<SessionEvents>,
    state_rx: watch::Receiver<ConnectionState>,
    share_rx: watch::Receiver<Option<ShareLink>>,
}

impl SessionNegotiator {
    /// Host a session: capture local audio and originate the offer.
    pub fn host(
        config: Config,
        capture: Arc<dyn AudioCapture>,
        connector: Arc<dyn SignalingConnector>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self::new(config, capture, connector, transports, None)
    }

    /// Join a session under a known id and answer the offer.
    pub fn join(
        config: Config,
        capture: Arc<dyn AudioCapture>,
        connector: Arc<dyn SignalingConnector>,
        transports: Arc<dyn TransportFactory>,
        session_id: SessionId,
    ) -> Self {
        Self::new(config, capture, connector, transports, Some(session_id))
    }

    /// Role comes from `supplied_id`: none hosts, some joins.
    pub fn new(
        config: Config,
        capture: Arc<dyn AudioCapture>,
        connector: Arc<dyn SignalingConnector>,
        transports: Arc<dyn TransportFactory>,
        supplied_id: Option<SessionId>,
    ) -> Self {
        let session = match &supplied_id {
            Some(id) => Session::join(id.clone()),
            None => Session::initiate(),
        };
        let events = Arc::new(SessionEvents::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.state());
        let (share_tx, share_rx) = watch::channel(None);

        let driver = Driver {
            config,
            capture,
            connector,
            transports,
            supplied_id,
            session,
            events: events.clone(),
            state_tx,
            share_tx,
            commands: command_rx,
            channel: None,
            signaling_rx: None,
            transport: None,
            transport_rx: None,
            source: None,
            pending_candidates: Vec::new(),
            offer_sent: false,
            deadline: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands: command_tx,
            events,
            state_rx,
            share_rx,
        }
    }

    /// Subscribe to lifecycle events. The emission contract is fixed at
    /// construction; subscribing never mutates session state.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// The shareable URL, available once the session awaits its peer.
    pub fn share_link(&self) -> Option<ShareLink> {
        self.share_rx.borrow().clone()
    }

    /// Begin (or, after a failure, retry) the session. Never blocks;
    /// progress and failures surface through the event subscription.
    pub fn start(&self) {
        if self.commands.send(Command::Start).is_err() {
            debug!("start ignored, session driver already finished");
        }
    }

    /// Tear the session down. Idempotent from any state, including
    /// `Idle`; resolves once the transport, media source, and signaling
    /// channel are released.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { done: done_tx })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

/// Per-session actor owning all mutable state.
struct Driver {
    config: Config,
    capture: Arc<dyn AudioCapture>,
    connector: Arc<dyn SignalingConnector>,
    transports: Arc<dyn TransportFactory>,
    supplied_id: Option<SessionId>,
    session: Session,
    events: Arc<SessionEvents>,
    state_tx: watch::Sender<ConnectionState>,
    share_tx: watch::Sender<Option<ShareLink>>,
    commands: mpsc::UnboundedReceiver<Command>,
    channel: Option<Box<dyn SignalingChannel>>,
    signaling_rx: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    transport: Option<Box<dyn MediaTransport>>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    source: Option<crate::domain::media::MediaSource>,
    /// Remote candidates that arrived before a transport existed.
    pending_candidates: Vec<CandidatePayload>,
    offer_sent: bool,
    deadline: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        debug!(session_id = %self.session.id(), role = %self.session.role(), "session driver started");
        loop {
            let deadline_at = self.deadline;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Disconnect { done }) => {
                        self.handle_disconnect().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // Handle dropped without an explicit disconnect.
                        self.handle_disconnect().await;
                        return;
                    }
                },
                Some(event) = recv_opt(&mut self.signaling_rx) => self.handle_signaling(event).await,
                Some(event) = recv_opt(&mut self.transport_rx) => self.handle_transport(event).await,
                () = tokio::time::sleep_until(deadline_at.unwrap_or_else(Instant::now)),
                    if deadline_at.is_some() => self.handle_deadline().await,
            }
            if self.session.state() == ConnectionState::Closed {
                debug!(session_id = %self.session.id(), "session closed, driver exiting");
                return;
            }
        }
    }

    async fn handle_start(&mut self) {
        match self.session.state() {
            ConnectionState::Idle => {}
            ConnectionState::Failed => {
                info!("restarting session after failure");
                self.reset();
            }
            state => {
                warn!(%state, "start ignored in current state");
                return;
            }
        }

        if !self.config.rendezvous.is_secure_context() {
            self.fail(SessionError::Capture(CaptureError::InsecureContext(format!(
                "rendezvous endpoint {} is neither encrypted nor loopback",
                self.config.rendezvous.url
            ))))
            .await;
            return;
        }

        match self.session.role() {
            PeerRole::Initiator => self.start_hosting().await,
            PeerRole::Joiner => self.start_joining().await,
        }
    }

    /// A failed attempt is discarded wholesale; retrying runs against a
    /// brand-new session (and, when hosting, a fresh id).
    fn reset(&mut self) {
        self.session = match &self.supplied_id {
            Some(id) => Session::join(id.clone()),
            None => Session::initiate(),
        };
        self.offer_sent = false;
        self.pending_candidates.clear();
        self.deadline = None;
        self.share_tx.send_replace(None);
        self.publish_state();
    }

    async fn start_hosting(&mut self) {
        if let Err(e) = self.session.begin_capture() {
            warn!(error = %e, "capture transition rejected");
            return;
        }
        self.publish_state();

        let source = match self.capture.capture_system_audio().await {
            Ok(source) => source,
            Err(e) => {
                self.fail(e.into()).await;
                return;
            }
        };
        info!(source = %source.label(), kind = %source.kind(), "local audio source acquired");
        self.source = Some(source);

        if let Err(e) = self.session.await_peer() {
            warn!(error = %e, "await-peer transition rejected");
            return;
        }
        if !self.open_channel().await {
            return;
        }

        // Publish the share link before announcing the state so
        // subscribers reacting to `AwaitingPeer` always find it set.
        let link = ShareLink::new(&self.config.rendezvous.share_base_url, self.session.id());
        info!(url = %link, "session ready, share the link to connect");
        self.share_tx.send_replace(Some(link));
        self.publish_state();
    }

    async fn start_joining(&mut self) {
        if !self.open_channel().await {
            return;
        }
        self.send_message(SignalingMessage::Join).await;

        if let Err(e) = self.session.begin_negotiation() {
            warn!(error = %e, "negotiation transition rejected");
            return;
        }
        // The offer may lag behind rendezvous propagation; wait for it,
        // but not forever.
        self.arm_deadline();
        self.publish_state();
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::PeerJoined => self.maybe_send_offer("peer-joined notification").await,
            SignalingEvent::Message(SignalingMessage::Join) => {
                self.maybe_send_offer("join message").await
            }
            SignalingEvent::Message(SignalingMessage::Offer { payload }) => {
                self.handle_offer(payload).await
            }
            SignalingEvent::Message(SignalingMessage::Answer { payload }) => {
                self.handle_answer(payload).await
            }
            SignalingEvent::Message(SignalingMessage::IceCandidate { payload }) => {
                self.handle_candidate(payload).await
            }
            SignalingEvent::Message(SignalingMessage::Leave) => self.handle_leave().await,
            SignalingEvent::Lost(error) => {
                if !self.session.state().is_terminal() {
                    self.fail(error.into()).await;
                }
            }
        }
    }

    /// The counterpart is listening; originate the one offer. Both the
    /// peer-joined notification and the join message arm this, so it
    /// must stay idempotent.
    async fn maybe_send_offer(&mut self, trigger: &str) {
        if !self.session.role().is_initiator() {
            debug!(trigger, "joiner never originates an offer");
            return;
        }
        if self.offer_sent || self.session.state() != ConnectionState::AwaitingPeer {
            debug!(trigger, "offer trigger ignored");
            return;
        }

        info!(trigger, "counterpart present, starting negotiation");
        if let Err(e) = self.session.begin_negotiation() {
            warn!(error = %e, "negotiation transition rejected");
            return;
        }
        self.arm_deadline();
        self.publish_state();

        let outbound = self.source.as_mut().and_then(|source| source.take_frames());
        if !self.create_transport(outbound).await {
            return;
        }
        self.flush_pending_candidates().await;

        let offer = match self.transport.as_ref() {
            Some(transport) => transport.create_offer().await,
            None => return,
        };
        match offer {
            Ok(offer) => {
                self.offer_sent = true;
                self.send_message(SignalingMessage::Offer { payload: offer })
                    .await;
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn handle_offer(&mut self, payload: SessionDescription) {
        if self.session.role().is_initiator() {
            self.sequence_violation("offer received by the offering side");
            return;
        }
        if self.transport.is_some() {
            self.sequence_violation("duplicate offer");
            return;
        }
        if self.session.state() != ConnectionState::Negotiating {
            self.sequence_violation("offer outside negotiation");
            return;
        }

        if !self.create_transport(None).await {
            return;
        }
        self.flush_pending_candidates().await;

        let answer = match self.transport.as_ref() {
            Some(transport) => transport.accept_offer(payload).await,
            None => return,
        };
        match answer {
            Ok(answer) => {
                self.send_message(SignalingMessage::Answer { payload: answer })
                    .await
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn handle_answer(&mut self, payload: SessionDescription) {
        if !self.session.role().is_initiator() || !self.offer_sent {
            self.sequence_violation("answer without a locally sent offer");
            return;
        }
        let result = match self.transport.as_ref() {
            Some(transport) => transport.apply_answer(payload).await,
            None => {
                self.sequence_violation("answer with no active transport");
                return;
            }
        };
        match result {
            Ok(()) => debug!("remote answer applied"),
            Err(e) => self.fail(e.into()).await,
        }
    }

    /// Candidates are never dropped: applied on the spot when a
    /// transport exists, buffered until one does otherwise.
    async fn handle_candidate(&mut self, payload: CandidatePayload) {
        match self.transport.as_ref() {
            Some(transport) => {
                if let Err(e) = transport.add_remote_candidate(payload).await {
                    warn!(error = %e, "remote candidate rejected by transport");
                }
            }
            None => {
                debug!("buffering remote candidate until a transport exists");
                self.pending_candidates.push(payload);
            }
        }
    }

    async fn handle_leave(&mut self) {
        match self.session.state() {
            ConnectionState::Connected => {
                info!("peer left the session");
                self.close_session().await;
            }
            ConnectionState::Negotiating => {
                self.fail(SessionError::Transport(TransportError::NegotiationFailed(
                    "peer left during negotiation".to_string(),
                )))
                .await;
            }
            state => debug!(%state, "leave ignored"),
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.send_message(SignalingMessage::IceCandidate { payload: candidate })
                    .await;
            }
            TransportEvent::StateChanged(state) => self.handle_transport_state(state).await,
            TransportEvent::RemoteStreamAvailable(stream) => {
                info!(stream_id = %stream.id(), "remote audio stream available");
                self.events.remote_stream(stream);
            }
        }
    }

    async fn handle_transport_state(&mut self, state: TransportState) {
        match state {
            TransportState::Connected => {
                if self.session.state() != ConnectionState::Negotiating {
                    return;
                }
                if let Err(e) = self.session.mark_connected() {
                    warn!(error = %e, "connected transition rejected");
                    return;
                }
                self.deadline = None;
                info!("media path established, audio now flows peer-to-peer");
                self.publish_state();
            }
            TransportState::Failed => match self.session.state() {
                ConnectionState::Connected => {
                    // Not auto-restarted: a dropped capture source
                    // usually needs fresh user consent.
                    self.fail(SessionError::Transport(TransportError::ConnectivityLost(
                        "media transport failed".to_string(),
                    )))
                    .await;
                }
                state if !state.is_terminal() => {
                    self.fail(SessionError::Transport(TransportError::NegotiationFailed(
                        "media transport failed".to_string(),
                    )))
                    .await;
                }
                _ => {}
            },
            TransportState::Closed => {
                if self.session.state() == ConnectionState::Connected {
                    info!("remote side closed the media path");
                    self.close_session().await;
                }
            }
            TransportState::Disconnected => {
                warn!("media path disconnected, waiting for recovery");
            }
            TransportState::New | TransportState::Connecting => {
                debug!(%state, "transport state changed");
            }
        }
    }

    async fn handle_deadline(&mut self) {
        self.deadline = None;
        if self.session.state() == ConnectionState::Negotiating {
            self.fail(SessionError::Transport(TransportError::NegotiationFailed(
                "negotiation deadline exceeded".to_string(),
            )))
            .await;
        }
    }

    async fn handle_disconnect(&mut self) {
        debug!("disconnect requested");
        self.release_resources().await;
        if !self.session.state().is_terminal() {
            self.session.close();
            self.publish_state();
        }
    }

    async fn open_channel(&mut self) -> bool {
        let opened = self
            .connector
            .open(self.session.id(), self.session.role())
            .await;
        match opened {
            Ok((channel, events)) => {
                self.channel = Some(channel);
                self.signaling_rx = Some(events);
                true
            }
            Err(e) => {
                self.fail(e.into()).await;
                false
            }
        }
    }

    async fn create_transport(&mut self, outbound: Option<mpsc::Receiver<MediaFrame>>) -> bool {
        match self.transports.create(outbound).await {
            Ok((transport, events)) => {
                self.transport = Some(transport);
                self.transport_rx = Some(events);
                true
            }
            Err(e) => {
                self.fail(e.into()).await;
                false
            }
        }
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let buffered = std::mem::take(&mut self.pending_candidates);
        debug!(count = buffered.len(), "applying buffered remote candidates");
        for candidate in buffered {
            if let Err(e) = transport.add_remote_candidate(candidate).await {
                warn!(error = %e, "buffered remote candidate rejected by transport");
            }
        }
    }

    async fn send_message(&self, message: SignalingMessage) {
        match &self.channel {
            Some(channel) => channel.send(message).await,
            None => debug!(kind = message.kind(), "message dropped, channel not open"),
        }
    }

    /// Stray messages out of causal order are dropped and logged; peers
    /// legitimately race, so they are never fatal by themselves.
    fn sequence_violation(&self, reason: &str) {
        warn!(reason, "sequence-violating signaling message dropped");
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.config.negotiation.timeout());
    }

    fn publish_state(&self) {
        let state = self.session.state();
        self.state_tx.send_replace(state);
        self.events.state_changed(state);
    }

    async fn fail(&mut self, error: SessionError) {
        warn!(kind = error.kind(), error = %error, "session failed");
        self.release_resources().await;
        self.session.fail();
        self.state_tx.send_replace(self.session.state());
        self.events.error(error);
        self.events.state_changed(self.session.state());
    }

    async fn close_session(&mut self) {
        self.release_resources().await;
        self.session.close();
        self.publish_state();
    }

    /// Best-effort sweep, in order: transport, media source, signaling
    /// channel. Every release runs regardless of earlier failures.
    async fn release_resources(&mut self) {
        self.deadline = None;
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.transport_rx = None;
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.send(SignalingMessage::Leave).await;
            channel.close().await;
        }
        self.signaling_rx = None;
        self.pending_candidates.clear();
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
