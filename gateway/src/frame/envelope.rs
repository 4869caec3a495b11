//! Inner AMOP request envelope.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! type:u16 | topicLen:u16 | topic[topicLen] | data[...]
//! ```
//!
//! `topicLen` is capped at [`MAX_TOPIC_LENGTH`] — the same limit the AMOP
//! wire protocol this gateway interoperates with enforces. This envelope is
//! carried verbatim as the payload of AMOP-typed [`super::Frame`]s and is
//! never reinterpreted by intermediate peer hops; a forwarding gateway
//! copies the encoded bytes, it does not re-encode them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::FrameError;

/// Length of the envelope header: type(2) + topicLen(2).
pub const HEADER_LENGTH: usize = 2 + 2;

/// Largest topic length a `topicLen: u16` field can express.
pub const MAX_TOPIC_LENGTH: usize = u16::MAX as usize;

/// AMOP envelope subtypes, carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AmopMessageType {
    /// Peer gossip: advertise the sender's current topic sequence number.
    TopicSeq = 1,
    /// Peer gossip: request the peer's full topic snapshot.
    RequestTopic = 2,
    /// Peer gossip: carry a topic snapshot in response to `RequestTopic`.
    ResponseTopic = 3,
    /// Client/peer unicast request addressed by topic.
    AmopRequest = 4,
    /// Client/peer broadcast addressed by topic.
    AmopBroadcast = 5,
}

impl AmopMessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::TopicSeq),
            2 => Some(Self::RequestTopic),
            3 => Some(Self::ResponseTopic),
            4 => Some(Self::AmopRequest),
            5 => Some(Self::AmopBroadcast),
            _ => None,
        }
    }
}

/// The inner AMOP envelope: a message type, a topic the message is
/// addressed to, and an opaque data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmopEnvelope {
    pub message_type: u16,
    pub topic: String,
    pub data: Bytes,
}

impl AmopEnvelope {
    pub fn new(message_type: AmopMessageType, topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            message_type: message_type as u16,
            topic: topic.into(),
            data: data.into(),
        }
    }

    /// Encodes this envelope, rejecting a topic longer than
    /// [`MAX_TOPIC_LENGTH`] bytes.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let topic_bytes = self.topic.as_bytes();
        if topic_bytes.len() > MAX_TOPIC_LENGTH {
            return Err(FrameError::PayloadTooLarge(topic_bytes.len(), MAX_TOPIC_LENGTH));
        }
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + topic_bytes.len() + self.data.len());
        buf.put_u16(self.message_type);
        buf.put_u16(topic_bytes.len() as u16);
        buf.put_slice(topic_bytes);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decodes an envelope. Total: malformed or truncated input yields a
    /// [`FrameError::ShortBuffer`], never a panic.
    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LENGTH {
            return Err(FrameError::ShortBuffer {
                need: HEADER_LENGTH,
                have: buf.len(),
            });
        }
        let message_type = buf.get_u16();
        let topic_len = buf.get_u16() as usize;
        if buf.len() < topic_len {
            return Err(FrameError::ShortBuffer {
                need: topic_len,
                have: buf.len(),
            });
        }
        let topic_bytes = buf.split_to(topic_len);
        let topic = String::from_utf8_lossy(&topic_bytes).into_owned();
        Ok(Self {
            message_type,
            topic,
            data: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_amop_request_envelope() {
        let envelope = AmopEnvelope::new(
            AmopMessageType::AmopRequest,
            "consensus.topic",
            Bytes::from_static(b"payload-bytes"),
        );
        let encoded = envelope.encode().unwrap();
        let decoded = AmopEnvelope::decode(encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn empty_topic_and_data_round_trip() {
        let envelope = AmopEnvelope::new(AmopMessageType::TopicSeq, "", Bytes::new());
        let encoded = envelope.encode().unwrap();
        let decoded = AmopEnvelope::decode(encoded).unwrap();
        assert_eq!(decoded.topic, "");
        assert_eq!(decoded.data.len(), 0);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = AmopEnvelope::decode(Bytes::from_static(b"\x00")).unwrap_err();
        assert!(matches!(err, FrameError::ShortBuffer { .. }));
    }

    #[test]
    fn topic_length_exceeding_remaining_buffer_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(AmopMessageType::AmopBroadcast as u16);
        buf.put_u16(100);
        buf.put_slice(b"short");
        let err = AmopEnvelope::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, FrameError::ShortBuffer { .. }));
    }

    #[test]
    fn message_type_round_trips_through_from_u16() {
        assert_eq!(AmopMessageType::from_u16(4), Some(AmopMessageType::AmopRequest));
        assert_eq!(AmopMessageType::from_u16(99), None);
    }

    #[test]
    fn topic_of_exactly_max_length_encodes_and_decodes() {
        let topic = "t".repeat(MAX_TOPIC_LENGTH);
        let envelope = AmopEnvelope::new(AmopMessageType::AmopRequest, topic, Bytes::new());
        let encoded = envelope.encode().unwrap();
        let decoded = AmopEnvelope::decode(encoded).unwrap();
        assert_eq!(decoded.topic.len(), MAX_TOPIC_LENGTH);
    }

    #[test]
    fn topic_one_byte_over_max_length_is_rejected_at_encode() {
        let topic = "t".repeat(MAX_TOPIC_LENGTH + 1);
        let envelope = AmopEnvelope::new(AmopMessageType::AmopRequest, topic, Bytes::new());
        let err = envelope.encode().unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(MAX_TOPIC_LENGTH + 1, MAX_TOPIC_LENGTH));
    }
}
