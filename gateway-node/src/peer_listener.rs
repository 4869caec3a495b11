//! # Inbound peer listener
//!
//! The receiving half of the peer channel: sibling gateways dial this
//! listener to gossip topic state, forward AMOP requests addressed to one
//! of our SDK clients, and fan out broadcasts. Outbound traffic goes through
//! [`crate::transport::TcpPeerChannel`] instead — the two are symmetric but
//! separate, since a `PeerChannel` implementation only ever dials out.
//!
//! Wire format matches `transport.rs`: a 4-byte big-endian length prefix
//! followed by an encoded [`Frame`] carrying an [`AmopEnvelope`] payload.
//! Application-level routing failures are carried in-band via the frame's
//! `status` field — a request forwarded to a topic with no local subscriber
//! comes back with [`status::NOT_FOUND_CLIENT_BY_TOPIC`], which the caller's
//! `PeerChannel::unicast` turns into `AmopError::NotFoundClientByTopicDispatchMsg`
//! rather than a retryable transport error. Only [`AmopMessageType::AmopRequest`]
//! gets a written response; every other message type is one-way.

use std::net::SocketAddr;
use std::sync::Arc;

use bcos_rpc_gateway::amop::{AmopEngine, AmopError};
use bcos_rpc_gateway::frame::envelope::{AmopEnvelope, AmopMessageType};
use bcos_rpc_gateway::frame::{status, Frame, DEFAULT_MAX_FRAME_BYTES};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub async fn run(addr: SocketAddr, amop: Arc<AmopEngine>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "peer listener accepting connections");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let amop = amop.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer_addr, amop).await {
                tracing::debug!(%peer_addr, %err, "peer connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, peer_addr: SocketAddr, amop: Arc<AmopEngine>) -> std::io::Result<()> {
    let peer = peer_addr.to_string();
    let request_frame = read_frame(&mut stream).await?;
    let envelope = AmopEnvelope::decode(request_frame.payload.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let Some(message_type) = AmopMessageType::from_u16(envelope.message_type) else {
        tracing::debug!(%peer, message_type = envelope.message_type, "unsupported inbound peer message type");
        return Ok(());
    };

    match message_type {
        AmopMessageType::TopicSeq => {
            if let Some(seq) = decode_seq(&envelope.data) {
                amop.on_receive_topic_seq(&peer, seq).await;
            }
        }
        AmopMessageType::RequestTopic => {
            amop.on_receive_request_topic(&peer).await;
        }
        AmopMessageType::ResponseTopic => {
            let json = String::from_utf8_lossy(&envelope.data);
            amop.on_receive_response_topic(&peer, &json);
        }
        AmopMessageType::AmopRequest => match amop.handle_inbound_peer_request(&envelope.topic, envelope.data.clone()).await {
            Ok(response_data) => {
                let response = AmopEnvelope::new(AmopMessageType::AmopRequest, envelope.topic.clone(), response_data);
                write_response(&mut stream, &request_frame, status::SUCCESS, &response).await?;
            }
            Err(AmopError::NotFoundClientByTopicDispatchMsg) => {
                tracing::debug!(%peer, topic = %envelope.topic, "no local subscriber for forwarded amop request");
                let empty = AmopEnvelope::new(AmopMessageType::AmopRequest, envelope.topic.clone(), Bytes::new());
                write_response(&mut stream, &request_frame, status::NOT_FOUND_CLIENT_BY_TOPIC, &empty).await?;
            }
            Err(err) => {
                tracing::debug!(%peer, topic = %envelope.topic, %err, "inbound amop request could not be forwarded locally");
            }
        },
        AmopMessageType::AmopBroadcast => {
            amop.handle_inbound_peer_broadcast(&envelope.topic, envelope.data.clone()).await;
        }
    }
    Ok(())
}

fn decode_seq(data: &Bytes) -> Option<u32> {
    let bytes: [u8; 4] = data.as_ref().try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

async fn write_response(stream: &mut TcpStream, request_frame: &Frame, status: u16, envelope: &AmopEnvelope) -> std::io::Result<()> {
    let payload = envelope
        .encode()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let response = request_frame.respond(status, payload);
    write_frame(stream, &response).await
}

async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> std::io::Result<()> {
    let bytes = frame
        .encode(DEFAULT_MAX_FRAME_BYTES)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Frame> {
    let len = stream.read_u32().await?;
    if len as usize > DEFAULT_MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("peer frame of {len} bytes exceeds cap of {DEFAULT_MAX_FRAME_BYTES}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Frame::decode(buf.into()).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}
