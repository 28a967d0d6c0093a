// Opaque ranging token and its wire codec

use serde::{Deserialize, Serialize};

use crate::error::{RangingError, Result};

/// Version tag carried by every token payload; decode rejects any other version
pub const TOKEN_PROTOCOL_VERSION: u32 = 1;

/// Opaque ranging token produced by the ranging provider
///
/// The core never inspects the bytes; they are copied and forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingToken(Vec<u8>);

impl RangingToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Payloads exchanged between peers over the transport data channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerPayload {
    Token { version: u32, token: RangingToken },
}

/// Encode the local ranging token for the transport
pub fn encode_token(token: &RangingToken) -> Result<Vec<u8>> {
    let payload = PeerPayload::Token {
        version: TOKEN_PROTOCOL_VERSION,
        token: token.clone(),
    };

    serde_json::to_vec(&payload).map_err(|e| RangingError::TokenEncode(e.to_string()))
}

/// Decode a ranging token received from a peer
pub fn decode_token(bytes: &[u8]) -> Result<RangingToken> {
    let payload: PeerPayload =
        serde_json::from_slice(bytes).map_err(|e| RangingError::TokenDecode(e.to_string()))?;

    match payload {
        PeerPayload::Token { version, token } => {
            if version != TOKEN_PROTOCOL_VERSION {
                return Err(RangingError::TokenDecode(format!(
                    "Unsupported payload version: {}",
                    version
                )));
            }

            if token.is_empty() {
                return Err(RangingError::TokenDecode("Empty token".to_string()));
            }

            Ok(token)
        }
    }
}
