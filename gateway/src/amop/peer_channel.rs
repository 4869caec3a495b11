//! The peer channel (the "front service") abstracts node-to-node transport:
//! broadcast, unicast-by-node-id, and send-response. It also notifies the
//! engine of peer liveness changes via [`PeerChannel::live_peers`], polled
//! wherever the caller drives the reconciliation.
//!
//! This crate never implements the transport itself — it is an external
//! collaborator, specified only by this contract.

use std::collections::HashSet;

use async_trait::async_trait;

use super::AmopError;
use crate::frame::envelope::AmopEnvelope;

#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Sends `envelope` to `peer` and awaits its response. Used for
    /// unicast AMOP requests and forwarded client requests.
    async fn unicast(&self, peer: &str, envelope: AmopEnvelope) -> Result<AmopEnvelope, AmopError>;

    /// Sends `envelope` to `peer` with no response expected.
    async fn send_one_way(&self, peer: &str, envelope: AmopEnvelope) -> Result<(), AmopError>;

    /// Sends `envelope` to every currently known peer, no response expected.
    async fn broadcast_to_all(&self, envelope: AmopEnvelope);

    /// Currently known live peer node ids.
    fn live_peers(&self) -> HashSet<String>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Records every call made to it and returns canned responses/errors in
    /// FIFO order, for exercising the engine's retry and gossip logic
    /// without a real transport.
    #[derive(Default)]
    pub struct RecordingPeerChannel {
        pub unicast_calls: Mutex<Vec<(String, AmopEnvelope)>>,
        pub one_way_calls: Mutex<Vec<(String, AmopEnvelope)>>,
        pub broadcast_calls: Mutex<Vec<AmopEnvelope>>,
        pub unicast_responses: Mutex<VecDeque<Result<AmopEnvelope, AmopError>>>,
        pub live: Mutex<HashSet<String>>,
    }

    impl RecordingPeerChannel {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn push_unicast_response(&self, response: Result<AmopEnvelope, AmopError>) {
            self.unicast_responses.lock().push_back(response);
        }
    }

    #[async_trait]
    impl PeerChannel for RecordingPeerChannel {
        async fn unicast(&self, peer: &str, envelope: AmopEnvelope) -> Result<AmopEnvelope, AmopError> {
            self.unicast_calls.lock().push((peer.to_string(), envelope));
            self.unicast_responses
                .lock()
                .pop_front()
                .unwrap_or(Err(AmopError::Transport("no canned response".to_string())))
        }

        async fn send_one_way(&self, peer: &str, envelope: AmopEnvelope) -> Result<(), AmopError> {
            self.one_way_calls.lock().push((peer.to_string(), envelope));
            Ok(())
        }

        async fn broadcast_to_all(&self, envelope: AmopEnvelope) {
            self.broadcast_calls.lock().push(envelope);
        }

        fn live_peers(&self) -> HashSet<String> {
            self.live.lock().clone()
        }
    }
}
