// Peer transport abstraction - advertising, browsing, invitations and the data channel
// Implementations adapt a concrete wireless transport and push callbacks as events

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::{ConnectionState, PeerId};

/// Key-value metadata a peer attaches to its advertisement
pub type DiscoveryInfo = HashMap<String, String>;

/// Advertisement key carrying the service identity
pub const IDENTITY_KEY: &str = "identity";

/// Delivery guarantee for outgoing payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Abstraction over the peer-to-peer transport
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Advertise this device under the given service identity
    async fn start_advertising(&self, identity: &str) -> Result<()>;

    /// Stop advertising; a no-op when not advertising
    async fn stop_advertising(&self) -> Result<()>;

    /// Browse for peers advertising the given service identity
    async fn start_browsing(&self, identity: &str) -> Result<()>;

    /// Stop browsing; a no-op when not browsing
    async fn stop_browsing(&self) -> Result<()>;

    /// Invite a discovered peer to connect
    ///
    /// A peer that does not answer within `timeout` is dropped silently;
    /// no event is emitted for an expired invitation.
    async fn invite(&self, peer_id: &PeerId, timeout: Duration) -> Result<()>;

    /// Send a payload to a connected peer
    async fn send(&self, peer_id: &PeerId, payload: &[u8], reliability: Reliability)
        -> Result<()>;

    /// Tear down the active connection, if any
    async fn disconnect(&self) -> Result<()>;
}

/// Transport callbacks, delivered through the service event channel
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer advertising on the network came into range
    PeerFound {
        peer_id: PeerId,
        discovery_info: DiscoveryInfo,
    },
    /// A previously found peer went out of range
    PeerLost { peer_id: PeerId },
    /// A peer invited this device; reply `true` to accept
    InvitationReceived {
        peer_id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    /// The connection to a peer changed state
    ConnectionStateChanged {
        peer_id: PeerId,
        display_name: String,
        state: ConnectionState,
    },
    /// A data payload arrived from a peer
    DataReceived { peer_id: PeerId, payload: Vec<u8> },
    /// The transport reported a state this build does not recognize
    UnrecognizedState { peer_id: PeerId, detail: String },
}
