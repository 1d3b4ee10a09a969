//! Guards around message ordering: stray answers, early candidates,
//! duplicate offers, and the negotiation deadline.

mod common;

use common::{
    wait_for_error, wait_for_state, FakeCapture, FakeTransportFactory, QuietConnector, FAKE_SDP,
};
use earshot::config::Config;
use earshot::domain::session::value_object::ConnectionState;
use earshot::domain::shared::error::{SessionError, TransportError};
use earshot::domain::shared::value_objects::{PeerRole, SessionId};
use earshot::infrastructure::signaling::{
    CandidatePayload, InMemoryBroker, SessionDescription, SignalingChannel, SignalingConnector,
    SignalingEvent, SignalingMessage,
};
use earshot::SessionNegotiator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn short_timeout_config(timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.negotiation.timeout_ms = timeout_ms;
    config
}

#[tokio::test]
async fn test_answer_without_local_offer_is_ignored() {
    let broker = InMemoryBroker::new();
    let (transports, log) = FakeTransportFactory::new(0);

    // Offer triggers are suppressed, so the host never leaves
    // AwaitingPeer and never sends an offer.
    let host = SessionNegotiator::host(
        Config::default(),
        Arc::new(FakeCapture::new()),
        Arc::new(QuietConnector {
            inner: broker.clone(),
        }),
        Arc::new(transports),
    );
    let mut events = host.subscribe();
    host.start();
    wait_for_state(&mut events, ConnectionState::AwaitingPeer).await;
    let session_id = host.share_link().unwrap().session_id().clone();

    // A stray answer arrives with no offer ever sent.
    let (peer, _peer_rx) = broker.open(&session_id, PeerRole::Joiner).await.unwrap();
    peer.send(SignalingMessage::Answer {
        payload: SessionDescription::answer(FAKE_SDP),
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Dropped and logged: state unaltered, no transport touched, no
    // error surfaced.
    assert_eq!(host.state(), ConnectionState::AwaitingPeer);
    assert_eq!(log.offers_created.load(Ordering::SeqCst), 0);
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_early_candidates_are_buffered_and_applied_in_order() {
    let broker = InMemoryBroker::new();
    let (transports, log) = FakeTransportFactory::new(0);
    let session_id = SessionId::new("buffered1234").unwrap();

    // The counterpart sits in the room before the joiner arrives.
    let (peer, mut peer_rx) = broker.open(&session_id, PeerRole::Initiator).await.unwrap();

    let joiner = SessionNegotiator::join(
        Config::default(),
        Arc::new(FakeCapture::new()),
        Arc::new(broker.clone()),
        Arc::new(transports),
        session_id,
    );
    let mut events = joiner.subscribe();
    joiner.start();
    wait_for_state(&mut events, ConnectionState::Negotiating).await;

    // Candidates arrive before the offer; no transport exists yet.
    for index in 0..2 {
        peer.send(SignalingMessage::IceCandidate {
            payload: CandidatePayload {
                candidate: format!("candidate:{index} 1 udp 2130706431 203.0.113.9 4000{index} typ host"),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        })
        .await;
    }
    peer.send(SignalingMessage::Offer {
        payload: SessionDescription::offer(FAKE_SDP),
    })
    .await;

    wait_for_state(&mut events, ConnectionState::Connected).await;

    // The counterpart got the answer back.
    let answered = timeout(Duration::from_secs(2), async {
        loop {
            match peer_rx.recv().await {
                Some(SignalingEvent::Message(SignalingMessage::Answer { .. })) => return true,
                Some(_) => {}
                None => return false,
            }
        }
    })
    .await
    .unwrap();
    assert!(answered);

    // Both buffered candidates reached the transport, oldest first.
    let applied = log.applied_candidates.lock().unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].candidate.starts_with("candidate:0"));
    assert!(applied[1].candidate.starts_with("candidate:1"));
}

#[tokio::test]
async fn test_duplicate_offer_is_dropped() {
    let broker = InMemoryBroker::new();
    let (transports, log) = FakeTransportFactory::new(0);
    let session_id = SessionId::new("duplicated99").unwrap();

    let (peer, mut peer_rx) = broker.open(&session_id, PeerRole::Initiator).await.unwrap();

    let joiner = SessionNegotiator::join(
        Config::default(),
        Arc::new(FakeCapture::new()),
        Arc::new(broker.clone()),
        Arc::new(transports),
        session_id,
    );
    let mut events = joiner.subscribe();
    joiner.start();
    wait_for_state(&mut events, ConnectionState::Negotiating).await;

    peer.send(SignalingMessage::Offer {
        payload: SessionDescription::offer(FAKE_SDP),
    })
    .await;
    peer.send(SignalingMessage::Offer {
        payload: SessionDescription::offer(FAKE_SDP),
    })
    .await;

    wait_for_state(&mut events, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one answer; the replayed offer was dropped, not fatal.
    assert_eq!(log.answers_created.load(Ordering::SeqCst), 1);
    assert_eq!(joiner.state(), ConnectionState::Connected);

    let mut answers = 0;
    while let Ok(Some(event)) = timeout(Duration::from_millis(100), peer_rx.recv()).await {
        if matches!(
            event,
            SignalingEvent::Message(SignalingMessage::Answer { .. })
        ) {
            answers += 1;
        }
    }
    assert_eq!(answers, 1);
}

#[tokio::test]
async fn test_unclaimed_session_times_out_with_negotiation_failure() {
    let broker = InMemoryBroker::new();
    let (transports, _log) = FakeTransportFactory::new(0);

    // Nobody ever claims this id; the joiner waits, then fails cleanly.
    let joiner = SessionNegotiator::join(
        short_timeout_config(200),
        Arc::new(FakeCapture::new()),
        Arc::new(broker),
        Arc::new(transports),
        SessionId::new("ghost-session").unwrap(),
    );
    let mut events = joiner.subscribe();
    joiner.start();
    wait_for_state(&mut events, ConnectionState::Negotiating).await;

    let error = wait_for_error(&mut events).await;
    assert!(matches!(
        error,
        SessionError::Transport(TransportError::NegotiationFailed(_))
    ));
    wait_for_state(&mut events, ConnectionState::Failed).await;
}

#[tokio::test]
async fn test_handshake_completes_within_the_deadline() {
    // With a working counterpart the whole exchange finishes well
    // inside a short deadline.
    let broker = InMemoryBroker::new();
    let (host_transports, _host_log) = FakeTransportFactory::new(1);
    let (join_transports, _join_log) = FakeTransportFactory::new(1);

    let host = SessionNegotiator::host(
        short_timeout_config(2_000),
        Arc::new(FakeCapture::new()),
        Arc::new(broker.clone()),
        Arc::new(host_transports),
    );
    let mut host_events = host.subscribe();
    host.start();
    wait_for_state(&mut host_events, ConnectionState::AwaitingPeer).await;
    let session_id = host.share_link().unwrap().session_id().clone();

    let joiner = SessionNegotiator::join(
        short_timeout_config(2_000),
        Arc::new(FakeCapture::new()),
        Arc::new(broker),
        Arc::new(join_transports),
        session_id,
    );
    let mut join_events = joiner.subscribe();
    joiner.start();

    wait_for_state(&mut host_events, ConnectionState::Connected).await;
    wait_for_state(&mut join_events, ConnectionState::Connected).await;
}
