//! Collaboration configuration.

use std::time::Duration;

/// Environment variable overriding [`CollabConfig::relay_url`].
pub const RELAY_URL_ENV: &str = "ERD_RELAY_URL";

/// Reconnection policy of a relay transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Reconnect automatically after the link drops or a connect fails
    pub reconnect: bool,
    /// First retry delay; doubles on each consecutive failure
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for the retry delay
    pub reconnect_max_delay_ms: u64,
    /// How often a joining guest repeats its snapshot request
    pub snapshot_retry_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_base_delay_ms: 250,
            reconnect_max_delay_ms: 10_000,
            snapshot_retry_ms: 1_000,
        }
    }
}

impl TransportConfig {
    /// Short delays for tests.
    pub fn for_testing() -> Self {
        Self {
            reconnect: true,
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 100,
            snapshot_retry_ms: 50,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1 << shift)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// WebSocket URL of the relay
    pub relay_url: String,
    pub transport: TransportConfig,
    /// Buffer of the local event broadcast channel
    pub event_capacity: usize,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:4000".to_string(),
            transport: TransportConfig::default(),
            event_capacity: 256,
        }
    }
}

impl CollabConfig {
    /// Defaults, with the relay URL taken from `ERD_RELAY_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                config.relay_url = url.trim().to_string();
            }
        }
        config
    }

    pub fn for_testing() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:0".to_string(),
            transport: TransportConfig::for_testing(),
            event_capacity: 64,
        }
    }
}
