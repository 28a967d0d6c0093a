use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::PeerId;

#[derive(Error, Debug)]
pub enum RangingError {
    #[error("Ranging not supported on this device")]
    Unsupported,

    #[error("Token encoding failed: {0}")]
    TokenEncode(String),

    #[error("Token decoding failed: {0}")]
    TokenDecode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Ranging provider error: {0}")]
    Provider(String),

    #[error("Service not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, RangingError>;

impl RangingError {
    /// Classify this error for recovery policy and diagnostics
    pub fn kind(&self) -> FaultKind {
        match self {
            RangingError::Unsupported => FaultKind::CapabilityAbsent,
            RangingError::TokenEncode(_) => FaultKind::LocalDefect,
            RangingError::TokenDecode(_) => FaultKind::ProtocolViolation,
            RangingError::Transport(_) => FaultKind::Transient,
            RangingError::Provider(_) => FaultKind::Transient,
            RangingError::NotRunning => FaultKind::Transient,
        }
    }
}

/// Failure classes the session core distinguishes when recovering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Ordinary wireless churn; absorbed and recovered internally
    Transient,
    /// A defect on this device, e.g. the local token failed to encode
    LocalDefect,
    /// The peer sent something that does not decode as a token
    ProtocolViolation,
    /// This device cannot range at all
    CapabilityAbsent,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Transient => write!(f, "transient"),
            FaultKind::LocalDefect => write!(f, "local_defect"),
            FaultKind::ProtocolViolation => write!(f, "protocol_violation"),
            FaultKind::CapabilityAbsent => write!(f, "capability_absent"),
        }
    }
}

/// Diagnostic record pushed to the fault channel for non-transient failures
#[derive(Debug, Clone)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub message: String,
    pub peer_id: Option<PeerId>,
    pub at: DateTime<Utc>,
}

impl FaultReport {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            peer_id: None,
            at: Utc::now(),
        }
    }

    pub fn with_peer(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn from_error(err: &RangingError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
