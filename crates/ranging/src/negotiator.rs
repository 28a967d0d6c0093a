// Session Negotiator - finds exactly one compatible peer and tracks its connection
// Owns the peer session; everything else reads it through narrow accessors

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::RangingConfig;
use crate::error::Result;
use crate::token::RangingToken;
use crate::transport::{DiscoveryInfo, PeerTransport, IDENTITY_KEY};
use crate::types::{ConnectionState, PeerId, PeerSession};

/// What a connection transition changed, so the caller can react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    /// The tracked peer reached Connected
    BecameConnected,
    /// The tracked peer dropped to Disconnected
    BecameDisconnected,
    /// Tracked state changed without crossing Connected or Disconnected
    Updated,
    /// The event did not concern the tracked peer
    Ignored,
}

pub struct SessionNegotiator {
    transport: Arc<dyn PeerTransport>,
    service_identity: String,
    invite_timeout: Duration,
    max_peers: usize,
    session: Option<PeerSession>,
    connection_lost: bool,
    discovering: bool,
}

impl SessionNegotiator {
    pub fn new(transport: Arc<dyn PeerTransport>, config: &RangingConfig) -> Self {
        Self {
            transport,
            service_identity: config.service_identity.clone(),
            invite_timeout: config.invite_timeout(),
            max_peers: config.max_peers,
            session: None,
            connection_lost: false,
            discovering: false,
        }
    }

    /// Start advertising and browsing, stopping any previous discovery first
    pub async fn start_discovery(&mut self) -> Result<()> {
        if self.discovering {
            warn!("Discovery already active, stopping previous session");
        }
        self.stop_discovery().await?;

        info!("Starting discovery as: {}", self.service_identity);
        self.transport
            .start_advertising(&self.service_identity)
            .await?;
        self.transport.start_browsing(&self.service_identity).await?;
        self.discovering = true;
        Ok(())
    }

    /// Stop advertising and browsing; safe when idle
    pub async fn stop_discovery(&mut self) -> Result<()> {
        if self.discovering {
            info!("Stopping discovery");
            self.discovering = false;
        }
        self.transport.stop_advertising().await?;
        self.transport.stop_browsing().await?;
        Ok(())
    }

    /// React to a peer appearing: invite it when the identity matches and the cap allows
    pub async fn handle_peer_found(&mut self, peer_id: PeerId, info: DiscoveryInfo) -> Result<()> {
        match info.get(IDENTITY_KEY) {
            Some(identity) if *identity == self.service_identity => {}
            _ => {
                debug!("Ignoring peer {} advertising a foreign identity", peer_id);
                return Ok(());
            }
        }

        if self.connected_count() >= self.max_peers {
            debug!("Peer cap reached, not inviting {}", peer_id);
            return Ok(());
        }

        info!("Inviting peer: {}", peer_id);
        self.transport.invite(&peer_id, self.invite_timeout).await
    }

    /// Decide an incoming invitation: accept only while under the peer cap
    pub fn handle_invitation(&self, peer_id: &PeerId) -> bool {
        let accept = self.connected_count() < self.max_peers;
        if accept {
            info!("Accepting invitation from: {}", peer_id);
        } else {
            debug!("Declining invitation from {}, peer cap reached", peer_id);
        }
        accept
    }

    /// React to a peer leaving radio range; returns true when observers should be told
    pub fn handle_peer_lost(&mut self, peer_id: &PeerId) -> bool {
        match &self.session {
            Some(session) if session.peer_id == *peer_id => {
                warn!("Tracked peer lost: {}", peer_id);
                self.connection_lost = true;
                true
            }
            _ => {
                debug!("Untracked peer lost: {}", peer_id);
                false
            }
        }
    }

    /// Track a connection transition and report what changed
    pub fn handle_connection_change(
        &mut self,
        peer_id: PeerId,
        display_name: String,
        state: ConnectionState,
    ) -> SessionChange {
        if let Some(session) = self.session.as_mut() {
            if session.peer_id == peer_id {
                let previous = session.connection_state;
                session.connection_state = state;

                return match state {
                    ConnectionState::Connected => {
                        session.display_name = display_name;
                        session.connected_at = Some(Utc::now());
                        self.connection_lost = false;
                        info!("Peer connected: {}", peer_id);
                        if previous == ConnectionState::Connected {
                            SessionChange::Updated
                        } else {
                            SessionChange::BecameConnected
                        }
                    }
                    ConnectionState::Disconnected => {
                        self.connection_lost = true;
                        warn!("Peer disconnected: {}", peer_id);
                        if previous == ConnectionState::Disconnected {
                            SessionChange::Updated
                        } else {
                            SessionChange::BecameDisconnected
                        }
                    }
                    ConnectionState::Connecting => {
                        debug!("Peer connecting: {}", peer_id);
                        SessionChange::Updated
                    }
                };
            }

            // A second peer never pre-empts the one we hold
            if session.is_connected() || state != ConnectionState::Connected {
                debug!(
                    "Ignoring {} transition for {}, session held by {}",
                    state, peer_id, session.peer_id
                );
                return SessionChange::Ignored;
            }

            info!(
                "Peer {} completed the handshake ahead of pending {}",
                peer_id, session.peer_id
            );
        }

        match state {
            ConnectionState::Connected => {
                let mut session = PeerSession::new(peer_id.clone());
                session.connection_state = ConnectionState::Connected;
                session.display_name = display_name;
                session.connected_at = Some(Utc::now());
                self.session = Some(session);
                self.connection_lost = false;
                info!("Peer connected: {}", peer_id);
                SessionChange::BecameConnected
            }
            ConnectionState::Connecting => {
                let mut session = PeerSession::new(peer_id.clone());
                session.connection_state = ConnectionState::Connecting;
                self.session = Some(session);
                debug!("Peer connecting: {}", peer_id);
                SessionChange::Updated
            }
            ConnectionState::Disconnected => {
                debug!("Ignoring disconnect for untracked peer: {}", peer_id);
                SessionChange::Ignored
            }
        }
    }

    /// Deliberate teardown of the tracked connection
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.session.take().is_some() {
            debug!("Dropping tracked peer session");
        }
        self.connection_lost = false;
        self.transport.disconnect().await
    }

    /// Forget exchanged tokens ahead of a fresh ranging session
    pub fn begin_fresh_exchange(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.token_shared_with_peer = false;
            session.remote_token = None;
            debug!("Reset token exchange for peer: {}", session.peer_id);
        }
    }

    /// Record the remote token on the tracked session
    pub fn set_remote_token(&mut self, token: RangingToken) {
        if let Some(session) = self.session.as_mut() {
            session.remote_token = Some(token);
        }
    }

    /// Mark the local token as delivered for the current ranging session
    pub fn mark_token_shared(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.token_shared_with_peer = true;
        }
    }

    pub fn clear_connection_lost(&mut self) {
        self.connection_lost = false;
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.as_ref()
    }

    pub fn connected_peer(&self) -> Option<&PeerSession> {
        self.session.as_ref().filter(|s| s.is_connected())
    }

    /// Number of peers in the Connected state, 0 or 1 under the default cap
    pub fn connected_count(&self) -> usize {
        match &self.session {
            Some(session) if session.is_connected() => 1,
            _ => 0,
        }
    }

    pub fn remote_token(&self) -> Option<&RangingToken> {
        self.session.as_ref().and_then(|s| s.remote_token.as_ref())
    }

    pub fn token_shared(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.token_shared_with_peer)
            .unwrap_or(false)
    }

    pub fn connection_lost(&self) -> bool {
        self.connection_lost
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering
    }
}
