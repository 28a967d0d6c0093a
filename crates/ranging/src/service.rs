// Ranging Service - wires the coordinator to its event sources and runs the pump

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RangingConfig;
use crate::coordinator::SessionCoordinator;
use crate::error::{FaultReport, RangingError, Result};
use crate::provider::{RangingEvent, RangingProvider};
use crate::transport::{PeerTransport, TransportEvent};
use crate::types::SessionSnapshot;

enum Command {
    Suspend,
    Resume,
    Shutdown,
}

/// Assembled but not yet running; `start` consumes it and spawns the pump
pub struct RangingService {
    coordinator: SessionCoordinator,
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    provider_tx: mpsc::Sender<RangingEvent>,
    provider_rx: mpsc::Receiver<RangingEvent>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    fault_rx: mpsc::Receiver<FaultReport>,
}

impl RangingService {
    pub fn new(
        config: RangingConfig,
        transport: Arc<dyn PeerTransport>,
        provider: Arc<dyn RangingProvider>,
    ) -> Result<Self> {
        if !provider.is_supported() {
            return Err(RangingError::Unsupported);
        }

        let capacity = config.event_capacity;
        let (transport_tx, transport_rx) = mpsc::channel(capacity);
        let (provider_tx, provider_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (fault_tx, fault_rx) = mpsc::channel(capacity);

        let coordinator = SessionCoordinator::new(&config, transport, provider, fault_tx);

        Ok(Self {
            coordinator,
            transport_tx,
            transport_rx,
            provider_tx,
            provider_rx,
            command_tx,
            command_rx,
            fault_rx,
        })
    }

    /// Sink the transport adapter pushes its events into
    pub fn transport_sink(&self) -> mpsc::Sender<TransportEvent> {
        self.transport_tx.clone()
    }

    /// Sink the ranging provider pushes its events into
    pub fn provider_sink(&self) -> mpsc::Sender<RangingEvent> {
        self.provider_tx.clone()
    }

    /// Spawn the event pump and hand back the control surface
    pub fn start(self) -> RangingHandle {
        let snapshot_rx = self.coordinator.subscribe();
        let Self {
            mut coordinator,
            transport_tx,
            mut transport_rx,
            provider_tx,
            mut provider_rx,
            command_tx,
            mut command_rx,
            fault_rx,
        } = self;

        let task = tokio::spawn(async move {
            coordinator.start().await;

            loop {
                tokio::select! {
                    event = transport_rx.recv() => match event {
                        Some(event) => coordinator.handle_transport_event(event).await,
                        None => {
                            debug!("Transport event channel closed");
                            break;
                        }
                    },
                    event = provider_rx.recv() => match event {
                        Some(event) => coordinator.handle_ranging_event(event).await,
                        None => {
                            debug!("Ranging event channel closed");
                            break;
                        }
                    },
                    command = command_rx.recv() => match command {
                        Some(Command::Suspend) => coordinator.suspend().await,
                        Some(Command::Resume) => coordinator.resume().await,
                        Some(Command::Shutdown) | None => break,
                    },
                }
            }

            coordinator.shutdown().await;
            debug!("Event pump terminated");
        });

        info!("Ranging service started");
        RangingHandle {
            command_tx,
            transport_tx,
            provider_tx,
            snapshot_rx,
            fault_rx: Some(fault_rx),
            task: Some(task),
        }
    }
}

/// Control surface for a running service
///
/// Holds clones of the event sinks, so adapters stay pluggable after start.
/// Dropping the handle closes the command channel and the pump shuts down.
pub struct RangingHandle {
    command_tx: mpsc::Sender<Command>,
    transport_tx: mpsc::Sender<TransportEvent>,
    provider_tx: mpsc::Sender<RangingEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    fault_rx: Option<mpsc::Receiver<FaultReport>>,
    task: Option<JoinHandle<()>>,
}

impl RangingHandle {
    /// Watch the latest session snapshot
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Take the fault stream; only the first caller gets it
    pub fn faults(&mut self) -> Option<mpsc::Receiver<FaultReport>> {
        self.fault_rx.take()
    }

    pub fn transport_sink(&self) -> mpsc::Sender<TransportEvent> {
        self.transport_tx.clone()
    }

    pub fn provider_sink(&self) -> mpsc::Sender<RangingEvent> {
        self.provider_tx.clone()
    }

    pub async fn suspend(&self) -> Result<()> {
        self.command_tx
            .send(Command::Suspend)
            .await
            .map_err(|_| RangingError::NotRunning)
    }

    pub async fn resume(&self) -> Result<()> {
        self.command_tx
            .send(Command::Resume)
            .await
            .map_err(|_| RangingError::NotRunning)
    }

    /// Stop the pump and wait for it to drain
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.command_tx.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Event pump join failed: {}", e);
            }
        }
        Ok(())
    }
}
