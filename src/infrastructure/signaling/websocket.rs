//! WebSocket signaling client
//!
//! Speaks a small JSON envelope to the rendezvous service: attach to a
//! named session, relay control messages to the other participant, be
//! told when a second participant attaches. A dropped link is
//! re-established transparently; negotiation state upstream is
//! untouched as long as the link comes back within the configured
//! attempts. Exhausting them surfaces `SignalingEvent::Lost`.

use crate::config::RendezvousConfig;
use crate::domain::shared::error::SignalingError;
use crate::domain::shared::value_objects::{PeerRole, SessionId};
use crate::infrastructure::signaling::{
    SignalingChannel, SignalingConnector, SignalingEvent, SignalingMessage,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Envelope exchanged with the rendezvous service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    /// Client attaches to a named session.
    Attach { session_id: String },
    /// Service reports a second participant in the session.
    PeerJoined,
    /// A control message relayed between participants.
    Relay { message: SignalingMessage },
}

enum Outbound {
    Relay(SignalingMessage),
    Close,
}

enum LinkExit {
    LocalClose,
    LinkDown(String),
}

/// Connects signaling channels through a rendezvous WebSocket endpoint.
pub struct WebSocketConnector {
    config: RendezvousConfig,
}

impl WebSocketConnector {
    pub fn new(config: RendezvousConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
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
        let url = self.config.url.clone();
        let ws = match connect_and_attach(&url, session_id).await {
            Ok(ws) => ws,
            Err(first_err) => {
                match reconnect(
                    &url,
                    session_id,
                    self.config.reconnect_attempts,
                    self.config.reconnect_delay(),
                )
                .await
                {
                    Some(ws) => ws,
                    None => return Err(first_err),
                }
            }
        };

        info!(session_id = %session_id, %role, "attached to rendezvous service");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(
            ws,
            url,
            session_id.clone(),
            out_rx,
            ev_tx,
            self.config.reconnect_attempts,
            self.config.reconnect_delay(),
        ));

        Ok((Box::new(WsChannel { out: out_tx }), ev_rx))
    }
}

struct WsChannel {
    out: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl SignalingChannel for WsChannel {
    async fn send(&self, message: SignalingMessage) {
        if self.out.send(Outbound::Relay(message)).is_err() {
            debug!("signaling send after link teardown dropped");
        }
    }

    async fn close(&self) {
        let _ = self.out.send(Outbound::Close);
    }
}

async fn connect_and_attach(url: &str, session_id: &SessionId) -> Result<WsStream, SignalingError> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| SignalingError::RendezvousUnreachable(e.to_string()))?;
    let attach = WireFrame::Attach {
        session_id: session_id.as_str().to_string(),
    };
    let json = serde_json::to_string(&attach)
        .map_err(|e| SignalingError::MalformedMessage(e.to_string()))?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| SignalingError::RendezvousUnreachable(e.to_string()))?;
    Ok(ws)
}

async fn reconnect(
    url: &str,
    session_id: &SessionId,
    attempts: u32,
    delay: std::time::Duration,
) -> Option<WsStream> {
    for attempt in 1..=attempts {
        sleep(delay).await;
        match connect_and_attach(url, session_id).await {
            Ok(ws) => {
                info!(attempt, "rendezvous link re-established");
                return Some(ws);
            }
            Err(e) => warn!(attempt, error = %e, "rendezvous reconnect attempt failed"),
        }
    }
    None
}

async fn run_link(
    mut ws: WsStream,
    url: String,
    session_id: SessionId,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    ev_tx: mpsc::UnboundedSender<SignalingEvent>,
    attempts: u32,
    delay: std::time::Duration,
) {
    // Message in flight when the link last dropped; resent on recovery.
    let mut pending: Option<SignalingMessage> = None;

    loop {
        if let Some(message) = pending.take() {
            if let Err(e) = send_relay(&mut ws, &message).await {
                warn!(error = %e, "resend after reconnect failed");
                pending = Some(message);
            }
        }

        let exit = if pending.is_some() {
            LinkExit::LinkDown("resend failed".to_string())
        } else {
            drive(&mut ws, &mut out_rx, &ev_tx, &mut pending).await
        };

        match exit {
            LinkExit::LocalClose => {
                let _ = ws.close(None).await;
                debug!(session_id = %session_id, "signaling link closed locally");
                return;
            }
            LinkExit::LinkDown(reason) => {
                warn!(session_id = %session_id, %reason, "rendezvous link lost, reconnecting");
                match reconnect(&url, &session_id, attempts, delay).await {
                    Some(new_ws) => ws = new_ws,
                    None => {
                        let _ = ev_tx.send(SignalingEvent::Lost(
                            SignalingError::RendezvousUnreachable(reason),
                        ));
                        return;
                    }
                }
            }
        }
    }
}

async fn drive(
    ws: &mut WsStream,
    out_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ev_tx: &mpsc::UnboundedSender<SignalingEvent>,
    pending: &mut Option<SignalingMessage>,
) -> LinkExit {
    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&text, ev_tx),
                Some(Ok(Message::Close(_))) | None => {
                    return LinkExit::LinkDown("rendezvous closed the connection".to_string());
                }
                Some(Ok(_)) => {} // ping/pong handled by the protocol layer
                Some(Err(e)) => return LinkExit::LinkDown(e.to_string()),
            },
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Relay(message)) => {
                    if let Err(e) = send_relay(ws, &message).await {
                        *pending = Some(message);
                        return LinkExit::LinkDown(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => return LinkExit::LocalClose,
            },
        }
    }
}

async fn send_relay(
    ws: &mut WsStream,
    message: &SignalingMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let frame = WireFrame::Relay {
        message: message.clone(),
    };
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "unserializable signaling message dropped");
            return Ok(());
        }
    };
    ws.send(Message::Text(json)).await
}

fn handle_frame(text: &str, ev_tx: &mpsc::UnboundedSender<SignalingEvent>) {
    match serde_json::from_str::<WireFrame>(text) {
        Ok(WireFrame::PeerJoined) => {
            let _ = ev_tx.send(SignalingEvent::PeerJoined);
        }
        Ok(WireFrame::Relay { message }) => {
            let _ = ev_tx.send(SignalingEvent::Message(message));
        }
        Ok(WireFrame::Attach { .. }) => debug!("ignoring attach echo from rendezvous"),
        // Malformed frames are logged and dropped, never fatal: peers may
        // race us with frames from a newer protocol revision.
        Err(e) => warn!(error = %e, "dropping malformed signaling frame"),
    }
}
