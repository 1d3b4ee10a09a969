use earshot::config::Config;
use earshot::infrastructure::capture::CpalAudioCapture;
use earshot::infrastructure::signaling::WebSocketConnector;
use earshot::infrastructure::transport::WebRtcTransportFactory;
use earshot::{SessionEvent, SessionId, SessionNegotiator, ShareLink};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into())),
        )
        .init();

    info!("Starting Earshot");

    // Load configuration
    let config = match std::env::var("EARSHOT_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::default(),
    };
    info!(
        rendezvous = %config.rendezvous.url,
        "Configuration loaded"
    );

    // A share link (or bare session id) argument makes this the joiner.
    let session_id = std::env::args().nth(1).and_then(|arg| parse_entry(&arg));

    let capture = Arc::new(CpalAudioCapture::new(config.capture.clone()));
    let connector = Arc::new(WebSocketConnector::new(config.rendezvous.clone()));
    let transports = Arc::new(WebRtcTransportFactory::new(config.ice.clone()));

    let negotiator = match session_id {
        Some(id) => {
            info!(session_id = %id, "Joining session");
            SessionNegotiator::join(config, capture, connector, transports, id)
        }
        None => {
            info!("Hosting a new session");
            SessionNegotiator::host(config, capture, connector, transports)
        }
    };

    let mut events = negotiator.subscribe();
    negotiator.start();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged { state }) => {
                    info!(%state, "Session state changed");
                    if let Some(link) = negotiator.share_link() {
                        info!(url = %link, "Share this link with the listener");
                    }
                    if state.is_terminal() {
                        break;
                    }
                }
                Ok(SessionEvent::RemoteStreamAvailable { stream }) => {
                    info!(stream_id = %stream.id(), "Receiving remote audio");
                    tokio::spawn(async move {
                        let mut frames: u64 = 0;
                        while stream.next_frame().await.is_some() {
                            frames += 1;
                            if frames % 500 == 0 {
                                info!(frames, "Remote audio flowing");
                            }
                        }
                        info!(frames, "Remote audio stream ended");
                    });
                }
                Ok(SessionEvent::Error { error }) => {
                    error!(kind = error.kind(), %error, "Session error");
                }
                Err(e) => {
                    warn!(error = %e, "Event stream interrupted");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                negotiator.disconnect().await;
                break;
            }
        }
    }

    Ok(())
}

/// Accept either a full share link or a bare session id.
fn parse_entry(arg: &str) -> Option<SessionId> {
    ShareLink::parse(arg).or_else(|| SessionId::new(arg))
}
