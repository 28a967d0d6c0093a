pub mod types;
pub mod config;
pub mod token;
pub mod transport;
pub mod provider;
pub mod negotiator;
pub mod exchange;
pub mod lifecycle;
pub mod snapshot;
pub mod coordinator;
pub mod service;
pub mod error;

pub use types::*;
pub use error::{RangingError, Result, FaultKind, FaultReport};
pub use config::RangingConfig;
pub use token::{RangingToken, PeerPayload, encode_token, decode_token, TOKEN_PROTOCOL_VERSION};
pub use transport::{PeerTransport, TransportEvent, DiscoveryInfo, Reliability, IDENTITY_KEY};
pub use provider::{RangingProvider, RangingEvent};
pub use negotiator::{SessionNegotiator, SessionChange};
pub use exchange::TokenExchange;
pub use lifecycle::RangingController;
pub use snapshot::{SnapshotPublisher, build_snapshot};
pub use coordinator::SessionCoordinator;
pub use service::{RangingService, RangingHandle};
