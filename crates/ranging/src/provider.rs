// Ranging provider abstraction - drives distance and direction measurement runs
// Implementations adapt the platform ranging engine (UWB or similar)

use async_trait::async_trait;

use crate::error::Result;
use crate::token::RangingToken;
use crate::types::Direction;

/// Abstraction over the platform ranging engine
#[async_trait]
pub trait RangingProvider: Send + Sync {
    /// Whether this device can range at all; checked once before the service is built
    fn is_supported(&self) -> bool;

    /// Token identifying the local ranging context
    ///
    /// After `stop_run` the provider rebuilds its context, so the next call
    /// returns a token the peer has never seen.
    async fn local_token(&self) -> Result<RangingToken>;

    /// Start, or re-run, measurement against the peer identified by `remote`
    async fn start_run(&self, local: &RangingToken, remote: &RangingToken) -> Result<()>;

    /// Tear down the current ranging context
    async fn stop_run(&self) -> Result<()>;
}

/// Provider callbacks, delivered through the service event channel
#[derive(Debug, Clone)]
pub enum RangingEvent {
    /// A new measurement of the peer's position
    Measurement {
        distance: f32,
        direction: Option<Direction>,
    },
    /// The ranging context died and cannot be reused
    Invalidated { reason: String },
    /// The provider dropped the peer from the run
    PeerRemoved { reason: String },
    /// Measurement paused, e.g. the app left the foreground
    Suspended,
    /// Measurement may continue after a suspension
    Resumed,
}
