// Snapshot projection - folds negotiation and ranging state into one observable value

use tokio::sync::watch;

use crate::types::{ConnectionState, PeerSession, RangingRun, SessionSnapshot};

const ANGLE_RIGHT_DEGREES: f64 = 90.0;
const ANGLE_LEFT_DEGREES: f64 = -90.0;

/// Project the current session and run into a snapshot
///
/// The direction angle collapses to left or right of the device axis: a
/// positive x component points right, anything else points left. Without a
/// direction the angle reads zero and `direction_available` is false.
pub fn build_snapshot(
    session: Option<&PeerSession>,
    connection_lost: bool,
    run: &RangingRun,
) -> SessionSnapshot {
    let (peer_name, connection_state) = match session {
        Some(session) => (session.display_name.clone(), session.connection_state),
        None => (String::new(), ConnectionState::Disconnected),
    };

    let direction_angle = match run.last_direction {
        Some(direction) if direction.x > 0.0 => ANGLE_RIGHT_DEGREES,
        Some(_) => ANGLE_LEFT_DEGREES,
        None => 0.0,
    };

    SessionSnapshot {
        peer_name,
        connection_state,
        distance: run.last_distance,
        direction_available: run.last_direction.is_some(),
        direction_angle,
        connection_lost,
    }
}

/// Publishes snapshots over a watch channel; observers always see the latest
pub struct SnapshotPublisher {
    tx: watch::Sender<SessionSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn publish(&self, session: Option<&PeerSession>, connection_lost: bool, run: &RangingRun) {
        let snapshot = build_snapshot(session, connection_lost, run);
        self.tx.send_replace(snapshot);
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}
