//! # Peer channel transport
//!
//! A concrete [`PeerChannel`] wiring sibling gateways over plain TCP. Each
//! peer is addressed by the `host:port` string configured in `[amop].peers`;
//! messages are [`Frame`]s (the same outer frame the SDK-facing WebSocket
//! uses) prefixed with a 4-byte big-endian length, since unlike a WebSocket,
//! a raw TCP stream carries no message boundaries of its own. The frame's
//! payload is an encoded [`AmopEnvelope`] and its `status` field carries the
//! routing outcome (success, or a `NOT_FOUND_CLIENT_BY_TOPIC`-style routing
//! error) back to the caller, the same way the WS session reports it to an
//! SDK client.
//!
//! This mirrors the gateway's own minimal-dependency posture for outbound
//! connections (see `node_service.rs`): no new wire-format crate, just the
//! codec this crate already defines for [`Frame`]/[`AmopEnvelope`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bcos_rpc_gateway::amop::{AmopError, PeerChannel};
use bcos_rpc_gateway::frame::envelope::{AmopEnvelope, AmopMessageType};
use bcos_rpc_gateway::frame::{frame_type, status, Frame, DEFAULT_MAX_FRAME_BYTES};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

fn new_frame_seq() -> [u8; 16] {
    *Uuid::new_v4().as_bytes()
}

fn frame_type_for(message_type: AmopMessageType) -> u16 {
    match message_type {
        AmopMessageType::TopicSeq => frame_type::AMOP_TOPIC_SEQ,
        AmopMessageType::RequestTopic => frame_type::AMOP_REQUEST_TOPIC,
        AmopMessageType::ResponseTopic => frame_type::AMOP_RESPONSE_TOPIC,
        AmopMessageType::AmopRequest => frame_type::AMOP_REQUEST,
        AmopMessageType::AmopBroadcast => frame_type::AMOP_BROADCAST,
    }
}

async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> Result<(), AmopError> {
    let bytes = frame
        .encode(DEFAULT_MAX_FRAME_BYTES)
        .map_err(|e| AmopError::Transport(e.to_string()))?;
    stream
        .write_u32(bytes.len() as u32)
        .await
        .map_err(|e| AmopError::Transport(e.to_string()))?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| AmopError::Transport(e.to_string()))?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Frame, AmopError> {
    let len = stream
        .read_u32()
        .await
        .map_err(|e| AmopError::Transport(e.to_string()))?;
    if len as usize > DEFAULT_MAX_FRAME_BYTES {
        return Err(AmopError::Transport(format!(
            "peer frame of {len} bytes exceeds cap of {DEFAULT_MAX_FRAME_BYTES}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| AmopError::Transport(e.to_string()))?;
    Frame::decode(buf.into()).map_err(|e| AmopError::Transport(e.to_string()))
}

/// Wraps `envelope` in a [`Frame`] addressed by its message type.
fn frame_for_envelope(envelope: &AmopEnvelope, message_type: AmopMessageType) -> Result<Frame, AmopError> {
    let payload = envelope.encode().map_err(|e| AmopError::Transport(e.to_string()))?;
    Ok(Frame::new(frame_type_for(message_type), new_frame_seq(), payload))
}

/// Dials a statically-configured set of sibling gateways over TCP.
///
/// Liveness is connection-based: a peer is "live" for [`PeerChannel::live_peers`]
/// purposes as long as it is in the configured set. A dial failure on a given
/// call surfaces as [`AmopError::Transport`] and is handled by the engine's
/// existing retry-across-peers loop; it does not remove the peer from the set.
pub struct TcpPeerChannel {
    peers: RwLock<HashSet<String>>,
}

impl TcpPeerChannel {
    pub fn new(peers: impl IntoIterator<Item = String>) -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(peers.into_iter().collect()),
        })
    }
}

#[async_trait]
impl PeerChannel for TcpPeerChannel {
    /// Sends `envelope` and awaits the peer's response frame. A
    /// `NOT_FOUND_CLIENT_BY_TOPIC` status is a routing error, distinct from a
    /// transport failure: it surfaces as
    /// [`AmopError::NotFoundClientByTopicDispatchMsg`] so the caller's retry
    /// loop can stop instead of trying the next candidate peer.
    async fn unicast(&self, peer: &str, envelope: AmopEnvelope) -> Result<AmopEnvelope, AmopError> {
        let message_type = AmopMessageType::from_u16(envelope.message_type).unwrap_or(AmopMessageType::AmopRequest);
        let request_frame = frame_for_envelope(&envelope, message_type)?;

        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(|e| AmopError::Transport(format!("connect {peer}: {e}")))?;
        write_frame(&mut stream, &request_frame).await?;
        let response_frame = read_frame(&mut stream).await?;

        match response_frame.status {
            status::SUCCESS => AmopEnvelope::decode(response_frame.payload).map_err(|e| AmopError::Transport(e.to_string())),
            status::NOT_FOUND_CLIENT_BY_TOPIC => Err(AmopError::NotFoundClientByTopicDispatchMsg),
            other => Err(AmopError::Transport(format!("peer returned status {other}"))),
        }
    }

    async fn send_one_way(&self, peer: &str, envelope: AmopEnvelope) -> Result<(), AmopError> {
        let message_type = AmopMessageType::from_u16(envelope.message_type).unwrap_or(AmopMessageType::AmopBroadcast);
        let frame = frame_for_envelope(&envelope, message_type)?;

        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(|e| AmopError::Transport(format!("connect {peer}: {e}")))?;
        write_frame(&mut stream, &frame).await
    }

    async fn broadcast_to_all(&self, envelope: AmopEnvelope) {
        let peers: Vec<String> = self.peers.read().iter().cloned().collect();
        for peer in peers {
            if let Err(err) = self.send_one_way(&peer, envelope.clone()).await {
                tracing::warn!(peer, %err, "broadcast to peer failed");
            }
        }
    }

    fn live_peers(&self) -> HashSet<String> {
        self.peers.read().clone()
    }
}
