// Session Coordinator - single owner of negotiation, exchange, and ranging state
// Every event funnels through one task, so the core holds no locks

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::RangingConfig;
use crate::error::{FaultKind, FaultReport, RangingError};
use crate::exchange::TokenExchange;
use crate::lifecycle::RangingController;
use crate::negotiator::{SessionChange, SessionNegotiator};
use crate::provider::{RangingEvent, RangingProvider};
use crate::snapshot::SnapshotPublisher;
use crate::token::RangingToken;
use crate::transport::{PeerTransport, TransportEvent};
use crate::types::{PeerId, SessionSnapshot};

pub struct SessionCoordinator {
    negotiator: SessionNegotiator,
    exchange: TokenExchange,
    controller: RangingController,
    publisher: SnapshotPublisher,
    faults: mpsc::Sender<FaultReport>,
}

impl SessionCoordinator {
    pub fn new(
        config: &RangingConfig,
        transport: Arc<dyn PeerTransport>,
        provider: Arc<dyn RangingProvider>,
        faults: mpsc::Sender<FaultReport>,
    ) -> Self {
        Self {
            negotiator: SessionNegotiator::new(Arc::clone(&transport), config),
            exchange: TokenExchange::new(transport, Arc::clone(&provider)),
            controller: RangingController::new(provider),
            publisher: SnapshotPublisher::new(),
            faults,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    pub fn controller(&self) -> &RangingController {
        &self.controller
    }

    /// Open discovery and publish the initial snapshot
    pub async fn start(&mut self) {
        if let Err(e) = self.negotiator.start_discovery().await {
            warn!("Discovery start failed: {}", e);
        }
        self.publish();
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound {
                peer_id,
                discovery_info,
            } => {
                let outcome = self.negotiator.handle_peer_found(peer_id, discovery_info).await;
                if let Err(e) = outcome {
                    self.absorb(e);
                }
            }
            TransportEvent::PeerLost { peer_id } => {
                if self.negotiator.handle_peer_lost(&peer_id) {
                    self.publish();
                }
            }
            TransportEvent::InvitationReceived { peer_id, reply } => {
                let accept = self.negotiator.handle_invitation(&peer_id);
                if reply.send(accept).is_err() {
                    debug!("Invitation reply channel dropped for {}", peer_id);
                }
            }
            TransportEvent::ConnectionStateChanged {
                peer_id,
                display_name,
                state,
            } => {
                let change =
                    self.negotiator
                        .handle_connection_change(peer_id.clone(), display_name, state);
                self.apply_session_change(peer_id, change).await;
            }
            TransportEvent::DataReceived { peer_id, payload } => {
                self.handle_data(peer_id, &payload).await;
                self.publish();
            }
            TransportEvent::UnrecognizedState { peer_id, detail } => {
                warn!("Unrecognized transport state for {}: {}", peer_id, detail);
                self.report(
                    FaultReport::new(
                        FaultKind::LocalDefect,
                        format!("Unrecognized transport state: {}", detail),
                    )
                    .with_peer(peer_id),
                );
            }
        }
    }

    async fn apply_session_change(&mut self, peer_id: PeerId, change: SessionChange) {
        match change {
            SessionChange::BecameConnected => {
                let shared = self.exchange.share_token_if_needed(&mut self.negotiator).await;
                match shared {
                    Ok(true) => debug!("Shared local token with {}", peer_id),
                    Ok(false) => {}
                    Err(e) => self.absorb(e),
                }

                // A token that raced ahead of the connection settles now
                let parked = self.exchange.take_pending(&peer_id);
                if let Some(payload) = parked {
                    self.handle_data(peer_id, &payload).await;
                } else {
                    let remote = self.negotiator.remote_token().cloned();
                    if let Some(token) = remote {
                        self.start_run(&token).await;
                    }
                }
                self.publish();
            }
            SessionChange::BecameDisconnected | SessionChange::Updated => self.publish(),
            SessionChange::Ignored => {}
        }
    }

    async fn handle_data(&mut self, peer_id: PeerId, payload: &[u8]) {
        let accepted = self.exchange.accept_token(&mut self.negotiator, &peer_id, payload);
        match accepted {
            Ok(Some(token)) => {
                // Connecting peers store the token; the run waits for Connected
                if self.negotiator.connected_peer().is_some() {
                    self.start_run(&token).await;
                }
            }
            Ok(None) => {}
            Err(e) => self.absorb(e),
        }
    }

    pub async fn handle_ranging_event(&mut self, event: RangingEvent) {
        match event {
            RangingEvent::Measurement {
                distance,
                direction,
            } => {
                self.controller.handle_measurement(distance, direction);
                self.publish();
            }
            RangingEvent::Invalidated { reason } => self.restart_ranging(&reason).await,
            RangingEvent::PeerRemoved { reason } => self.restart_ranging(&reason).await,
            RangingEvent::Suspended => self.suspend().await,
            RangingEvent::Resumed => self.resume().await,
        }
    }

    /// Tear the dead run down and rebuild from scratch
    ///
    /// Tokens bind to a provider run, so both sides are stale once the run
    /// invalidates. Discovery reopens and the exchange starts over; a peer
    /// whose connection survived gets the fresh local token immediately.
    pub async fn restart_ranging(&mut self, reason: &str) {
        info!("Restarting ranging session: {}", reason);
        self.controller.invalidate();
        if let Err(e) = self.controller.stop_run().await {
            debug!("Run teardown failed: {}", e);
        }
        self.controller.reset();
        self.negotiator.begin_fresh_exchange();
        self.exchange.clear_pending();

        if let Err(e) = self.negotiator.start_discovery().await {
            warn!("Discovery restart failed: {}", e);
        }

        let shared = self.exchange.share_token_if_needed(&mut self.negotiator).await;
        match shared {
            Ok(true) => debug!("Re-shared the fresh local token with the surviving peer"),
            Ok(false) => {}
            Err(e) => self.absorb(e),
        }
        self.publish();
    }

    pub async fn suspend(&mut self) {
        self.controller.suspend();
        self.publish();
    }

    /// Resume a suspended run with the retained peer token
    ///
    /// The peer may have rotated its own token while the run was down, so the
    /// local token goes out again regardless of the shared flag.
    pub async fn resume(&mut self) {
        let remote = self.negotiator.remote_token().cloned();
        let outcome = self.controller.resume(remote.as_ref()).await;
        match outcome {
            Ok(true) => {
                let sent = self.exchange.share_token(&mut self.negotiator).await;
                if let Err(e) = sent {
                    self.absorb(e);
                }
            }
            Ok(false) => {}
            Err(e) => self.absorb(e),
        }
        self.publish();
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down ranging session core");
        if let Err(e) = self.negotiator.stop_discovery().await {
            debug!("Discovery stop failed during shutdown: {}", e);
        }
        if let Err(e) = self.controller.stop_run().await {
            debug!("Run teardown failed during shutdown: {}", e);
        }
        if let Err(e) = self.negotiator.disconnect().await {
            debug!("Disconnect failed during shutdown: {}", e);
        }
        self.publish();
    }

    /// Log a failure, and surface anything beyond a transient on the fault channel
    fn absorb(&self, err: RangingError) {
        if err.kind() == FaultKind::Transient {
            warn!("Recovering from transient failure: {}", err);
            return;
        }

        error!("{}", err);
        let mut report = FaultReport::from_error(&err);
        if let Some(session) = self.negotiator.session() {
            report = report.with_peer(session.peer_id.clone());
        }
        self.report(report);
    }

    fn report(&self, report: FaultReport) {
        if self.faults.try_send(report).is_err() {
            debug!("Fault channel full or closed, report dropped");
        }
    }

    fn publish(&self) {
        self.publisher.publish(
            self.negotiator.session(),
            self.negotiator.connection_lost(),
            self.controller.run(),
        );
    }

    async fn start_run(&mut self, remote: &RangingToken) {
        if let Err(e) = self.controller.start_run(remote).await {
            warn!("Ranging run start failed: {}", e);
        }
    }
}
