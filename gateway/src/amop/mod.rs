//! # AMOP engine (C5)
//!
//! The topic-routed messaging overlay: periodic topic-seq gossip between
//! peer gateways, topic-request/response handshake, unicast with retry,
//! broadcast fan-out, and cross-gateway forwarding of requests destined for
//! a local SDK client.

pub mod peer_channel;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub use peer_channel::PeerChannel;

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::frame::envelope::{AmopEnvelope, AmopMessageType};
use crate::frame::{frame_type, Frame};
use crate::session::{ClientRemovalListener, SendOptions, SessionError, SessionRegistry};
use crate::topic::{TopicError, TopicManager};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmopError {
    #[error("no peer is subscribed to this topic")]
    NotFoundPeerByTopicSendMsg,
    #[error("no local client is subscribed to this topic")]
    NotFoundClientByTopicDispatchMsg,
    #[error("send failed after exhausting every candidate peer")]
    AmopSendMsgFailed,
    #[error("unsupported packet type")]
    UnsupportedPacketType,
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<SessionError> for AmopError {
    fn from(err: SessionError) -> Self {
        AmopError::Transport(err.to_string())
    }
}

impl From<TopicError> for AmopError {
    fn from(err: TopicError) -> Self {
        AmopError::Transport(err.to_string())
    }
}

/// Reseeds the shuffle RNG from a monotonic clock on every call, per the
/// design note against relying on process-wide RNG state: an anchor
/// `Instant` is set once, and each call's seed is the elapsed nanoseconds
/// since then.
fn monotonic_seed() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}

fn new_frame_seq() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

fn encode_topic_seq_payload(seq: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.freeze()
}

pub struct AmopEngine {
    topics: Arc<TopicManager>,
    sessions: Arc<SessionRegistry>,
    peer_channel: Arc<dyn PeerChannel>,
    max_frame_bytes: usize,
}

impl AmopEngine {
    pub fn new(topics: Arc<TopicManager>, sessions: Arc<SessionRegistry>, peer_channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            topics,
            sessions,
            peer_channel,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    // -- Gossip protocol ----------------------------------------------------

    /// Fires on a 2-second timer (driven by the caller): broadcasts the
    /// local `topicSeq` to every peer.
    pub async fn on_gossip_tick(&self) {
        let envelope = AmopEnvelope::new(AmopMessageType::TopicSeq, "", encode_topic_seq_payload(self.topics.topic_seq()));
        self.peer_channel.broadcast_to_all(envelope).await;
    }

    /// On receiving a peer's advertised seq: request a fresh snapshot only
    /// if it differs from what's stored.
    pub async fn on_receive_topic_seq(&self, peer: &str, seq: u32) {
        if self.topics.check_peer_seq(peer, seq) {
            let envelope = AmopEnvelope::new(AmopMessageType::RequestTopic, "", Bytes::new());
            if let Err(err) = self.peer_channel.send_one_way(peer, envelope).await {
                tracing::warn!(peer, %err, "failed to request topic snapshot from peer");
            }
        }
    }

    /// On receiving a topic-list request: reply with our own snapshot.
    pub async fn on_receive_request_topic(&self, peer: &str) {
        match self.topics.snapshot_as_json() {
            Ok(json) => {
                let envelope = AmopEnvelope::new(AmopMessageType::ResponseTopic, "", Bytes::from(json.into_bytes()));
                if let Err(err) = self.peer_channel.send_one_way(peer, envelope).await {
                    tracing::warn!(peer, %err, "failed to reply with topic snapshot");
                }
            }
            Err(err) => tracing::warn!(peer, %err, "failed to build local topic snapshot"),
        }
    }

    /// On receiving a peer's topic snapshot: parse and apply it. Malformed
    /// JSON is logged and dropped, never propagated as an error.
    pub fn on_receive_response_topic(&self, peer: &str, json: &str) {
        match TopicManager::parse_snapshot(json) {
            Ok((seq, topics)) => self.topics.update_peer(peer, seq, topics),
            Err(err) => tracing::warn!(peer, %err, "malformed topic snapshot from peer, dropping"),
        }
    }

    /// On a peer-list change notification from the front service: reap
    /// state for peers that are no longer live.
    pub fn on_peer_list_changed(&self, live_peers: &HashSet<String>) {
        self.topics.reconcile_peers(live_peers);
    }

    // -- Unicast with retry ---------------------------------------------------

    /// Looks up candidate peers for `topic`, shuffles them (reseeded from a
    /// monotonic clock), and tries each in turn until one succeeds. The
    /// result is produced exactly once.
    pub async fn async_send(&self, topic: &str, data: Bytes) -> Result<Bytes, AmopError> {
        let mut candidates = self.topics.lookup_peers_by_topic(topic);
        if candidates.is_empty() {
            return Err(AmopError::NotFoundPeerByTopicSendMsg);
        }
        let mut rng = StdRng::seed_from_u64(monotonic_seed());
        candidates.shuffle(&mut rng);

        while let Some(peer) = candidates.pop() {
            let envelope = AmopEnvelope::new(AmopMessageType::AmopRequest, topic, data.clone());
            match self.peer_channel.unicast(&peer, envelope).await {
                Ok(response) => return Ok(response.data),
                Err(AmopError::NotFoundClientByTopicDispatchMsg) => {
                    // Routing error, not a transport failure — not retried against the next candidate.
                    return Err(AmopError::NotFoundClientByTopicDispatchMsg);
                }
                Err(err) => {
                    tracing::debug!(peer, topic, %err, "unicast attempt failed, trying next candidate");
                    continue;
                }
            }
        }
        Err(AmopError::AmopSendMsgFailed)
    }

    /// Dispatches an AMOPBroadcast frame to every subscribed peer. No
    /// acknowledgement is expected; failures are logged only.
    pub async fn async_send_broadcast(&self, topic: &str, data: Bytes) {
        let peers = self.topics.lookup_peers_by_topic(topic);
        for peer in peers {
            let envelope = AmopEnvelope::new(AmopMessageType::AmopBroadcast, topic, data.clone());
            if let Err(err) = self.peer_channel.send_one_way(&peer, envelope).await {
                tracing::warn!(peer, topic, %err, "broadcast delivery failed");
            }
        }
    }

    // -- Cross-gateway forwarding ----------------------------------------

    /// A peer's AMOPRequest destined for one of our SDK clients. Picks a
    /// subscribed local session with the same shuffle-and-retry discipline
    /// as unicast, forwards the request frame verbatim, and returns the
    /// client's response bytes (or the gateway's error status).
    pub async fn handle_inbound_peer_request(&self, topic: &str, data: Bytes) -> Result<Bytes, AmopError> {
        let mut candidates = self.topics.lookup_clients_by_topic(topic);
        if candidates.is_empty() {
            return Err(AmopError::NotFoundClientByTopicDispatchMsg);
        }
        let mut rng = StdRng::seed_from_u64(monotonic_seed());
        candidates.shuffle(&mut rng);

        while let Some(endpoint) = candidates.pop() {
            let Some(session) = self.sessions.get(&endpoint) else {
                continue;
            };
            match self.forward_request_to_session(&session, topic, data.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::debug!(endpoint, topic, %err, "forward attempt failed, trying next client");
                    continue;
                }
            }
        }
        Err(AmopError::AmopSendMsgFailed)
    }

    async fn forward_request_to_session(
        &self,
        session: &Arc<crate::session::Session>,
        topic: &str,
        data: Bytes,
    ) -> Result<Bytes, AmopError> {
        let envelope = AmopEnvelope::new(AmopMessageType::AmopRequest, topic, data);
        let payload = envelope.encode().map_err(|err| AmopError::Transport(err.to_string()))?;
        let frame = Frame::new(frame_type::AMOP_REQUEST, new_frame_seq(), payload);

        let (tx, rx) = tokio::sync::oneshot::channel();
        session.send(frame, SendOptions::default(), self.max_frame_bytes, Box::new(move |result| {
            let _ = tx.send(result);
        }));

        let outcome = rx.await.map_err(|_| AmopError::Transport("session dropped before responding".to_string()))?;
        let response_frame = outcome?;
        Ok(response_frame.payload)
    }

    /// A peer's AMOPBroadcast destined for this gateway's SDK clients.
    /// Unlike [`Self::handle_inbound_peer_request`], every locally
    /// subscribed client is delivered to, not just one; no response is
    /// collected, matching the broadcast frame's fire-and-forget contract.
    pub async fn handle_inbound_peer_broadcast(&self, topic: &str, data: Bytes) {
        let endpoints = self.topics.lookup_clients_by_topic(topic);
        for endpoint in endpoints {
            let Some(session) = self.sessions.get(&endpoint) else {
                continue;
            };
            let envelope = AmopEnvelope::new(AmopMessageType::AmopBroadcast, topic, data.clone());
            let payload = match envelope.encode() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(endpoint, topic, %err, "failed to encode inbound broadcast for local client");
                    continue;
                }
            };
            let frame = Frame::new(frame_type::AMOP_BROADCAST, new_frame_seq(), payload);
            if let Err(err) = session.send_frame(&frame, self.max_frame_bytes).await {
                tracing::debug!(endpoint, topic, %err, "broadcast delivery to local client failed");
            }
        }
    }

    // -- Client-to-cluster path -------------------------------------------

    /// A client's subscribe frame: replaces its topic set and immediately
    /// announces the new `topicSeq` to every peer gateway.
    pub async fn handle_client_subscribe(&self, endpoint: &str, topics: HashSet<String>) {
        self.topics.subscribe(endpoint, topics);
        self.on_gossip_tick().await;
    }

    /// A client's unicast request frame: routed exactly like a peer-to-peer
    /// unicast.
    pub async fn handle_client_request(&self, topic: &str, data: Bytes) -> Result<Bytes, AmopError> {
        self.async_send(topic, data).await
    }

    /// A client's broadcast frame.
    pub async fn handle_client_broadcast(&self, topic: &str, data: Bytes) {
        self.async_send_broadcast(topic, data).await;
    }
}

/// Bridges session-registry removal into AMOP's topic reap-and-announce:
/// on disconnect, any topic whose subscriber set becomes empty is announced
/// to peers via an immediate gossip tick.
impl ClientRemovalListener for AmopEngine {
    fn on_client_removed(&self, endpoint: &str) {
        let topics = self.topics.clone();
        let peer_channel = self.peer_channel.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            let topics_before = topics.query_topics(&endpoint).unwrap_or_default();
            topics.remove_client(&endpoint);
            let any_emptied = topics_before.iter().any(|topic| topics.lookup_clients_by_topic(topic).is_empty());
            if any_emptied {
                let envelope = AmopEnvelope::new(AmopMessageType::TopicSeq, "", encode_topic_seq_payload(topics.topic_seq()));
                peer_channel.broadcast_to_all(envelope).await;
            }
        });
    }
}
