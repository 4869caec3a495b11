//! # Frame Codec (C1)
//!
//! Binary layout for the two wire formats this gateway speaks:
//!
//! - [`Frame`] — the outer WebSocket frame shared by every SDK-facing
//!   message: JSON-RPC requests/responses, the handshake, AMOP client
//!   traffic, and server-initiated pushes.
//! - [`envelope::AmopEnvelope`] — the inner AMOP request envelope, carried
//!   inside the payload of AMOP-typed frames (and, unmodified, across the
//!   peer channel between gateways).
//!
//! Encoders are pure functions on immutable inputs. Decoders are total:
//! they never panic on untrusted input, only return an error variant.

pub mod envelope;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum number of bytes a single frame's payload may carry before the
/// session read path rejects it (spec.md §4.2: "Frame size cap: 10 MiB").
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Length of the frame header in bytes: type(2) + status(2) + seq(16).
pub const HEADER_LENGTH: usize = 2 + 2 + 16;

/// SDK-facing frame type tags.
///
/// These are local to this gateway's WebSocket protocol (distinct from the
/// inner [`envelope::AmopMessageType`] subtypes used on the peer channel).
/// Unknown types are logged and dropped per spec.md §6.
pub mod frame_type {
    /// First frame on a new session; response carries `{protocolVersion, groupInfoList}`.
    pub const HANDSHAKE: u16 = 0x0001;
    /// JSON-RPC 2.0 request/response, shared with the HTTP front (C9).
    pub const RPC_REQUEST: u16 = 0x0002;
    /// Server-initiated `{group, nodeName, blockNumber}` push.
    pub const BLOCK_NOTIFY: u16 = 0x0003;
    /// Server-initiated full `GroupInfo` push.
    pub const GROUP_NOTIFY: u16 = 0x0004;
    /// Server-initiated event-subscription match push.
    pub const EVENT_LOG_PUSH: u16 = 0x0005;
    /// Client subscribe: payload is an [`super::envelope::AmopEnvelope`] whose
    /// `data` is a JSON topic list.
    pub const AMOP_SUBSCRIBE_TOPIC: u16 = 0x0010;
    /// Client/peer unicast AMOP request.
    pub const AMOP_REQUEST: u16 = 0x0011;
    /// Client/peer AMOP broadcast.
    pub const AMOP_BROADCAST: u16 = 0x0012;
    /// Peer gossip: advertise local topicSeq.
    pub const AMOP_TOPIC_SEQ: u16 = 0x0013;
    /// Peer gossip: ask for the peer's topic list.
    pub const AMOP_REQUEST_TOPIC: u16 = 0x0014;
    /// Peer gossip: carry the peer's topic snapshot.
    pub const AMOP_RESPONSE_TOPIC: u16 = 0x0015;
}

/// Status codes carried in a [`Frame`]'s `status` field.
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const NOT_FOUND_PEER_BY_TOPIC: u16 = 1;
    pub const NOT_FOUND_CLIENT_BY_TOPIC: u16 = 2;
    pub const UNSUPPORTED_PACKET_TYPE: u16 = 3;
    pub const TIMEOUT: u16 = 4;
    pub const INTERNAL_ERROR: u16 = 5;
}

/// Errors raised while encoding or decoding a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer too short: need at least {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("frame payload of {0} bytes exceeds the configured cap of {1} bytes")]
    PayloadTooLarge(usize, usize),
}

/// The outer WebSocket frame. Carries at minimum a type, a status, a
/// 16-byte sequence id (typically a UUID), and a payload. All integers are
/// network byte order (big-endian).
///
/// Invariant: the sequence id is unique within a session for the lifetime
/// of an outstanding request; a response echoes the request's sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u16,
    pub status: u16,
    pub seq: [u8; 16],
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: u16, seq: [u8; 16], payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            status: status::SUCCESS,
            seq,
            payload: payload.into(),
        }
    }

    /// Builds a response frame that echoes `self`'s sequence id, per the
    /// invariant that "a response echoes the request's sequence id".
    pub fn respond(&self, status: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type: self.frame_type,
            status,
            seq: self.seq,
            payload: payload.into(),
        }
    }

    /// Encodes this frame to bytes, rejecting payloads over `max_payload`.
    pub fn encode(&self, max_payload: usize) -> Result<Bytes, FrameError> {
        if self.payload.len() > max_payload {
            return Err(FrameError::PayloadTooLarge(self.payload.len(), max_payload));
        }
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + self.payload.len());
        buf.put_u16(self.frame_type);
        buf.put_u16(self.status);
        buf.put_slice(&self.seq);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decodes a frame from `buf`, consuming every byte supplied (the
    /// remainder after the header is the payload). Total: never panics on
    /// malformed input, returns [`FrameError::ShortBuffer`] instead.
    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LENGTH {
            return Err(FrameError::ShortBuffer {
                need: HEADER_LENGTH,
                have: buf.len(),
            });
        }
        let frame_type = buf.get_u16();
        let status = buf.get_u16();
        let mut seq = [0u8; 16];
        buf.copy_to_slice(&mut seq);
        let payload = buf;
        Ok(Self {
            frame_type,
            status,
            seq,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(byte: u8) -> [u8; 16] {
        [byte; 16]
    }

    #[test]
    fn round_trips_a_well_formed_frame() {
        let frame = Frame::new(frame_type::RPC_REQUEST, seq(7), Bytes::from_static(b"hello"));
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_payload_round_trips() {
        let frame = Frame::new(frame_type::HANDSHAKE, seq(1), Bytes::new());
        let encoded = frame.encode(1024).unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn oversized_payload_is_rejected_at_encode() {
        let frame = Frame::new(frame_type::RPC_REQUEST, seq(1), vec![0u8; 100]);
        let err = frame.encode(10).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(100, 10));
    }

    #[test]
    fn short_buffer_is_rejected_at_decode() {
        let err = Frame::decode(Bytes::from_static(b"short")).unwrap_err();
        assert!(matches!(err, FrameError::ShortBuffer { .. }));
    }

    #[test]
    fn response_echoes_request_sequence_id() {
        let request = Frame::new(frame_type::AMOP_REQUEST, seq(42), Bytes::from_static(b"q"));
        let response = request.respond(status::SUCCESS, Bytes::from_static(b"a"));
        assert_eq!(response.seq, request.seq);
        assert_eq!(response.frame_type, request.frame_type);
    }

    #[test]
    fn ten_mebibyte_payload_is_accepted_exactly_at_the_cap() {
        let payload = vec![0u8; DEFAULT_MAX_FRAME_BYTES];
        let frame = Frame::new(frame_type::RPC_REQUEST, seq(1), payload);
        assert!(frame.encode(DEFAULT_MAX_FRAME_BYTES).is_ok());
    }

    #[test]
    fn one_byte_over_the_cap_is_rejected() {
        let payload = vec![0u8; DEFAULT_MAX_FRAME_BYTES + 1];
        let frame = Frame::new(frame_type::RPC_REQUEST, seq(1), payload);
        assert!(frame.encode(DEFAULT_MAX_FRAME_BYTES).is_err());
    }
}
