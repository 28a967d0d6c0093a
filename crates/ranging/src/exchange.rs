// Token Exchange Protocol - delivers the local ranging token exactly once per
// ranging session and validates tokens arriving from the peer

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RangingError, Result};
use crate::negotiator::SessionNegotiator;
use crate::provider::RangingProvider;
use crate::token::{decode_token, encode_token, RangingToken};
use crate::transport::{PeerTransport, Reliability};
use crate::types::PeerId;

pub struct TokenExchange {
    transport: Arc<dyn PeerTransport>,
    provider: Arc<dyn RangingProvider>,
    /// Payload that arrived before its sender was confirmed as the peer
    pending: Option<(PeerId, Vec<u8>)>,
}

impl TokenExchange {
    pub fn new(transport: Arc<dyn PeerTransport>, provider: Arc<dyn RangingProvider>) -> Self {
        Self {
            transport,
            provider,
            pending: None,
        }
    }

    /// Share the local token once per ranging session
    ///
    /// Returns true when a send happened, false when it was suppressed.
    pub async fn share_token_if_needed(&self, negotiator: &mut SessionNegotiator) -> Result<bool> {
        if negotiator.connected_peer().is_none() {
            debug!("No connected peer to share the token with");
            return Ok(false);
        }
        if negotiator.token_shared() {
            debug!("Token already shared for this ranging session");
            return Ok(false);
        }

        self.share_token(negotiator).await?;
        Ok(true)
    }

    /// Send the local token regardless of the shared flag
    ///
    /// Used after a resumption, when the peer may have rebuilt its context
    /// and needs our token again even though it was already delivered once.
    pub async fn share_token(&self, negotiator: &mut SessionNegotiator) -> Result<()> {
        let peer_id = match negotiator.connected_peer() {
            Some(session) => session.peer_id.clone(),
            None => {
                debug!("No connected peer to share the token with");
                return Ok(());
            }
        };

        let token = self
            .provider
            .local_token()
            .await
            .map_err(|e| RangingError::TokenEncode(format!("Local token unavailable: {}", e)))?;
        let payload = encode_token(&token)?;

        self.transport
            .send(&peer_id, &payload, Reliability::Reliable)
            .await?;

        // Only a confirmed send flips the flag; a failure leaves it unset so
        // a later trigger retries.
        negotiator.mark_token_shared();
        info!("Shared local ranging token with peer: {}", peer_id);
        Ok(())
    }

    /// Validate and store a token payload arriving from `from`
    ///
    /// Returns the decoded token when it came from the tracked peer. Payloads
    /// from senders not yet confirmed are parked so a token racing ahead of
    /// the connection transition is not lost.
    pub fn accept_token(
        &mut self,
        negotiator: &mut SessionNegotiator,
        from: &PeerId,
        payload: &[u8],
    ) -> Result<Option<RangingToken>> {
        let from_tracked_peer = negotiator
            .session()
            .map(|s| s.peer_id == *from)
            .unwrap_or(false);

        if from_tracked_peer {
            let token = decode_token(payload)?;
            negotiator.set_remote_token(token.clone());
            negotiator.clear_connection_lost();
            // The decoded token supersedes anything this sender parked earlier
            if self.take_pending(from).is_some() {
                debug!("Dropped a superseded parked payload from {}", from);
            }
            info!("Received ranging token from peer: {}", from);
            return Ok(Some(token));
        }

        if negotiator.connected_peer().is_some() {
            debug!("Ignoring payload from unrelated sender: {}", from);
            return Ok(None);
        }

        debug!("Parking token payload from unconfirmed sender: {}", from);
        self.pending = Some((from.clone(), payload.to_vec()));
        Ok(None)
    }

    /// Hand back a parked payload once `peer_id` is the confirmed peer
    pub fn take_pending(&mut self, peer_id: &PeerId) -> Option<Vec<u8>> {
        match self.pending.take() {
            Some((from, payload)) if from == *peer_id => Some(payload),
            other => {
                self.pending = other;
                None
            }
        }
    }

    /// Drop any parked payload; stale once a fresh ranging session starts
    pub fn clear_pending(&mut self) {
        if self.pending.take().is_some() {
            debug!("Discarded a parked token payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RangingConfig;
    use crate::error::FaultKind;
    use crate::types::ConnectionState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct SendRecorder {
        sent: Mutex<Vec<(PeerId, Vec<u8>)>>,
        fail_sends: AtomicBool,
    }

    impl SendRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<(PeerId, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PeerTransport for SendRecorder {
        async fn start_advertising(&self, _identity: &str) -> Result<()> {
            Ok(())
        }

        async fn stop_advertising(&self) -> Result<()> {
            Ok(())
        }

        async fn start_browsing(&self, _identity: &str) -> Result<()> {
            Ok(())
        }

        async fn stop_browsing(&self) -> Result<()> {
            Ok(())
        }

        async fn invite(&self, _peer_id: &PeerId, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn send(
            &self,
            peer_id: &PeerId,
            payload: &[u8],
            _reliability: Reliability,
        ) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RangingError::Transport("send failed".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((peer_id.clone(), payload.to_vec()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FixedTokenProvider {
        token: RangingToken,
        fail_token: AtomicBool,
    }

    impl FixedTokenProvider {
        fn new(bytes: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                token: RangingToken::new(bytes),
                fail_token: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl RangingProvider for FixedTokenProvider {
        fn is_supported(&self) -> bool {
            true
        }

        async fn local_token(&self) -> Result<RangingToken> {
            if self.fail_token.load(Ordering::SeqCst) {
                return Err(RangingError::Provider("no token".to_string()));
            }
            Ok(self.token.clone())
        }

        async fn start_run(&self, _local: &RangingToken, _remote: &RangingToken) -> Result<()> {
            Ok(())
        }

        async fn stop_run(&self) -> Result<()> {
            Ok(())
        }
    }

    fn create_test_exchange() -> (TokenExchange, SessionNegotiator, Arc<SendRecorder>) {
        let transport = SendRecorder::new();
        let provider = FixedTokenProvider::new(vec![7, 7, 7]);
        let config = RangingConfig::default();
        let negotiator = SessionNegotiator::new(transport.clone(), &config);
        let exchange = TokenExchange::new(transport.clone(), provider);
        (exchange, negotiator, transport)
    }

    fn connect(negotiator: &mut SessionNegotiator, peer: &str) {
        negotiator.handle_connection_change(
            peer.to_string(),
            "Alice".to_string(),
            ConnectionState::Connected,
        );
    }

    #[tokio::test]
    async fn test_share_sends_once_and_sets_the_flag() {
        let (exchange, mut negotiator, transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");

        let sent = exchange.share_token_if_needed(&mut negotiator).await.unwrap();
        assert!(sent);
        assert!(negotiator.token_shared());
        assert_eq!(transport.sent().len(), 1);

        // Duplicate trigger within the same ranging session is suppressed
        let sent = exchange.share_token_if_needed(&mut negotiator).await.unwrap();
        assert!(!sent);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_share_without_a_connected_peer_is_a_noop() {
        let (exchange, mut negotiator, transport) = create_test_exchange();

        let sent = exchange.share_token_if_needed(&mut negotiator).await.unwrap();

        assert!(!sent);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_leaves_the_flag_unset_for_a_retry() {
        let (exchange, mut negotiator, transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");
        transport.fail_sends.store(true, Ordering::SeqCst);

        let result = exchange.share_token_if_needed(&mut negotiator).await;

        assert!(result.is_err());
        assert!(!negotiator.token_shared(), "flag must stay unset after a failed send");

        // The next trigger retries and succeeds
        transport.fail_sends.store(false, Ordering::SeqCst);
        let sent = exchange.share_token_if_needed(&mut negotiator).await.unwrap();
        assert!(sent);
        assert!(negotiator.token_shared());
    }

    #[tokio::test]
    async fn test_unconditional_share_resends_with_the_flag_already_set() {
        let (exchange, mut negotiator, transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");

        exchange.share_token_if_needed(&mut negotiator).await.unwrap();
        exchange.share_token(&mut negotiator).await.unwrap();

        assert_eq!(transport.sent().len(), 2, "resume path resends the token");
        assert!(negotiator.token_shared());
    }

    #[tokio::test]
    async fn test_provider_without_a_token_reports_a_local_defect() {
        let transport = SendRecorder::new();
        let provider = FixedTokenProvider::new(vec![1]);
        provider.fail_token.store(true, Ordering::SeqCst);
        let config = RangingConfig::default();
        let mut negotiator = SessionNegotiator::new(transport.clone(), &config);
        let exchange = TokenExchange::new(transport.clone(), provider);
        connect(&mut negotiator, "peer-1");

        let err = exchange
            .share_token_if_needed(&mut negotiator)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FaultKind::LocalDefect);
        assert!(!negotiator.token_shared());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_token_from_the_tracked_peer_is_stored() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");
        let payload = encode_token(&RangingToken::new(vec![9, 9])).unwrap();

        let token = exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &payload)
            .unwrap();

        assert_eq!(token, Some(RangingToken::new(vec![9, 9])));
        assert_eq!(negotiator.remote_token(), Some(&RangingToken::new(vec![9, 9])));
    }

    #[tokio::test]
    async fn test_token_from_a_stranger_is_ignored_while_connected() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");
        let payload = encode_token(&RangingToken::new(vec![9, 9])).unwrap();

        let token = exchange
            .accept_token(&mut negotiator, &"stranger".to_string(), &payload)
            .unwrap();

        assert!(token.is_none());
        assert!(negotiator.remote_token().is_none());
        assert!(
            exchange.take_pending(&"stranger".to_string()).is_none(),
            "nothing is parked while a peer is confirmed"
        );
    }

    #[tokio::test]
    async fn test_early_token_is_parked_until_the_sender_connects() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        let payload = encode_token(&RangingToken::new(vec![4, 2])).unwrap();

        let token = exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &payload)
            .unwrap();
        assert!(token.is_none());

        let parked = exchange.take_pending(&"peer-1".to_string()).unwrap();
        assert_eq!(parked, payload);
        assert!(exchange.take_pending(&"peer-1".to_string()).is_none());
    }

    #[tokio::test]
    async fn test_parked_payload_is_kept_for_its_own_sender_only() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        let payload = encode_token(&RangingToken::new(vec![4, 2])).unwrap();
        exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &payload)
            .unwrap();

        assert!(exchange.take_pending(&"peer-2".to_string()).is_none());
        assert!(exchange.take_pending(&"peer-1".to_string()).is_some());
    }

    #[tokio::test]
    async fn test_tracked_token_supersedes_a_parked_payload() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        let stale = encode_token(&RangingToken::new(vec![1, 1])).unwrap();
        exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &stale)
            .unwrap();

        // The sender becomes tracked mid-handshake and delivers a newer token
        negotiator.handle_connection_change(
            "peer-1".to_string(),
            String::new(),
            ConnectionState::Connecting,
        );
        let fresh = encode_token(&RangingToken::new(vec![2, 2])).unwrap();
        let token = exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &fresh)
            .unwrap();

        assert_eq!(token, Some(RangingToken::new(vec![2, 2])));
        assert_eq!(negotiator.remote_token(), Some(&RangingToken::new(vec![2, 2])));
        assert!(
            exchange.take_pending(&"peer-1".to_string()).is_none(),
            "a parked payload must not outlive the token that replaced it"
        );
    }

    #[tokio::test]
    async fn test_undecodable_token_from_the_peer_is_a_protocol_violation() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");

        let err = exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), b"garbage")
            .unwrap_err();

        assert_eq!(err.kind(), FaultKind::ProtocolViolation);
        assert!(negotiator.remote_token().is_none());
        assert!(
            negotiator.connected_peer().is_some(),
            "a bad payload must not tear the session down"
        );
    }

    #[tokio::test]
    async fn test_received_token_clears_connection_lost() {
        let (mut exchange, mut negotiator, _transport) = create_test_exchange();
        connect(&mut negotiator, "peer-1");
        negotiator.handle_peer_lost(&"peer-1".to_string());
        assert!(negotiator.connection_lost());

        let payload = encode_token(&RangingToken::new(vec![9])).unwrap();
        exchange
            .accept_token(&mut negotiator, &"peer-1".to_string(), &payload)
            .unwrap();

        assert!(!negotiator.connection_lost());
    }
}
