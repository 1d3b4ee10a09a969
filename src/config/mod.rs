//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub rendezvous: RendezvousConfig,
    pub ice: IceConfig,
    pub capture: CaptureConfig,
    pub negotiation: NegotiationConfig,
}

/// Where to exchange connection metadata. Never carries audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    /// WebSocket endpoint of the rendezvous/relay service.
    pub url: String,
    /// Base URL share links are minted against.
    pub share_base_url: String,
    /// How many times a dropped rendezvous link is re-established
    /// before the loss is surfaced.
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl RendezvousConfig {
    /// Capture requires either an encrypted rendezvous link or a
    /// loopback address; plaintext across the network is rejected.
    pub fn is_secure_context(&self) -> bool {
        if self.url.starts_with("wss://") {
            return true;
        }
        let Some(rest) = self.url.strip_prefix("ws://") else {
            return false;
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = authority
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(authority);
        matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9460/ws".to_string(),
            share_base_url: "http://127.0.0.1:9460/listen".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 2_000,
        }
    }
}

/// STUN/TURN servers used for transport traversal. Relay credentials
/// are configuration, not protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServerConfig {
                urls: vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                ],
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Advisory capture quality target. The device may deliver less; DSP
/// (echo cancellation, noise suppression, auto-gain) is never applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Deadline for the offer/answer/connectivity exchange. Waiting
    /// forever is not acceptable; exceeding this fails the session.
    pub timeout_ms: u64,
}

impl NegotiationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_context() {
        let mut config = RendezvousConfig::default();
        assert!(config.is_secure_context());

        config.url = "wss://rendezvous.example.com/ws".to_string();
        assert!(config.is_secure_context());

        config.url = "ws://localhost:9460/ws".to_string();
        assert!(config.is_secure_context());

        config.url = "ws://10.0.0.7:9460/ws".to_string();
        assert!(!config.is_secure_context());

        config.url = "https://example.com".to_string();
        assert!(!config.is_secure_context());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rendezvous]
            url = "wss://relay.example.com/ws"

            [negotiation]
            timeout_ms = 15000
            "#,
        )
        .unwrap();

        assert_eq!(config.rendezvous.url, "wss://relay.example.com/ws");
        assert_eq!(config.rendezvous.reconnect_attempts, 5);
        assert_eq!(config.negotiation.timeout(), Duration::from_secs(15));
        assert_eq!(config.capture.sample_rate, 48_000);
    }
}
