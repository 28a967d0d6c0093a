use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::token::RangingToken;

/// Unique identifier for a peer, assigned by the transport
pub type PeerId = String;

/// Connection state of the tracked peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// The single peer this device negotiates a ranging session with
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub peer_id: PeerId,
    pub display_name: String,
    pub connection_state: ConnectionState,
    pub token_shared_with_peer: bool,
    pub remote_token: Option<RangingToken>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl PeerSession {
    /// Track a peer from its first transition; fields fill in as the connection settles
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            display_name: String::new(),
            connection_state: ConnectionState::Disconnected,
            token_shared_with_peer: false,
            remote_token: None,
            connected_at: None,
        }
    }

    /// Whether this peer counts against the connection cap
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// Lifecycle state of a ranging run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Active,
    Suspended,
    Invalidated,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NotStarted"),
            RunState::Active => write!(f, "Active"),
            RunState::Suspended => write!(f, "Suspended"),
            RunState::Invalidated => write!(f, "Invalidated"),
        }
    }
}

/// Direction vector reported by the ranging provider (unit length)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// The single measurement run driven against the connected peer
///
/// Replaced wholesale when the provider invalidates; the fresh run carries
/// a new `run_id` and no measurements.
#[derive(Debug, Clone)]
pub struct RangingRun {
    pub run_id: Uuid,
    pub state: RunState,
    pub last_distance: Option<f32>,
    pub last_direction: Option<Direction>,
    pub started_at: Option<DateTime<Utc>>,
}

impl RangingRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::NotStarted,
            last_distance: None,
            last_direction: None,
            started_at: None,
        }
    }
}

impl Default for RangingRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable projection of the session for observers
///
/// Rebuilt whole on every relevant event; observers never see a partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Display name of the connected peer, empty until one connects
    pub peer_name: String,
    pub connection_state: ConnectionState,
    /// Latest measured distance in meters, if any measurement arrived yet
    pub distance: Option<f32>,
    pub direction_available: bool,
    /// Horizontal bearing in degrees: 90 to the right, -90 to the left, 0 when unavailable
    pub direction_angle: f64,
    pub connection_lost: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            peer_name: String::new(),
            connection_state: ConnectionState::Disconnected,
            distance: None,
            direction_available: false,
            direction_angle: 0.0,
            connection_lost: false,
        }
    }
}
