//! Endpoint configuration, loaded from a TOML file via `serdeconv` rather than hand-parsed - the
//! same crate the corpus already leans on for its own config and key files.
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

fn default_bind_address() -> String {
    "0.0.0.0:4242".into()
}

fn default_heartbeat_millis() -> u64 {
    66
}

fn default_liveness_timeout_secs() -> u64 {
    15
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".into()
}

fn default_queue_depth() -> usize {
    crate::queue::DEFAULT_QUEUE_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_heartbeat_millis")]
    pub heartbeat_millis: u64,

    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    /// How long a session may sit in `Challenging`/`Connecting` before it's torn down, shorter
    /// than the full liveness timeout since an incomplete handshake is cheaper to abandon than a
    /// live connection (spec §4.4).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Player name a client presents in `CONNECT`. Unused server-side.
    #[serde(default)]
    pub player_name: Option<String>,
}

impl EndpointConfig {
    pub fn from_toml_file(path: &str) -> Result<EndpointConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }

    #[inline]
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_millis)
    }

    #[inline]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            bind_address: default_bind_address(),
            heartbeat_millis: default_heartbeat_millis(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            log_level: default_log_level(),
            queue_depth: default_queue_depth(),
            player_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_cadence() {
        let config = EndpointConfig::default();
        assert_eq!(config.heartbeat_period(), Duration::from_millis(66));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(15));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: EndpointConfig = serdeconv::from_toml_str("bind_address = \"127.0.0.1:9999\"").unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9999");
        assert_eq!(config.heartbeat_millis, default_heartbeat_millis());
    }
}
