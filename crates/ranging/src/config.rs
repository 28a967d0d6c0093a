use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEFAULT_SERVICE_IDENTITY: &str = "nearby-ranging/device";

/// Runtime configuration for the ranging service
#[derive(Debug, Clone, Deserialize)]
pub struct RangingConfig {
    /// Identity advertised by this device and required of discovered peers
    pub service_identity: String,
    /// Seconds an outgoing invitation waits before the peer is treated as gone (default: 10)
    pub invite_timeout_secs: u64,
    /// Maximum number of simultaneously connected peers (default: 1)
    pub max_peers: usize,
    /// Capacity of the transport/provider event channels (default: 100)
    pub event_capacity: usize,
}

impl RangingConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = RangingConfig {
            service_identity: env::var("RANGING_SERVICE_IDENTITY")
                .unwrap_or_else(|_| DEFAULT_SERVICE_IDENTITY.to_string()),
            invite_timeout_secs: env::var("RANGING_INVITE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_peers: env::var("RANGING_MAX_PEERS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            event_capacity: env::var("RANGING_EVENT_CAPACITY")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
        };

        // Event channels cannot be built with zero capacity
        if config.event_capacity == 0 {
            anyhow::bail!("RANGING_EVENT_CAPACITY must be at least 1");
        }

        Ok(config)
    }

    /// Invitation timeout as a `Duration`
    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            service_identity: DEFAULT_SERVICE_IDENTITY.to_string(),
            invite_timeout_secs: 10,
            max_peers: 1,
            event_capacity: 100,
        }
    }
}
