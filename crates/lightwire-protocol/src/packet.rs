//! Packet layout and classification.
//!
//! A decoded packet has a fixed header followed by a type-specific payload:
//!
//! ```text
//! +----------+------+----------+---------------------------------------+
//! | reserved | type | length   | payload                               |
//! | byte 0   | b 1  | byte 2   | bytes 3..                             |
//! +----------+------+----------+---------------------------------------+
//!   type 0 = string:        ASCII text of `length` bytes
//!   type 1 = light reading: i16 little-endian (length unused)
//! ```

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::{decode_frame, encode_frame};

/// Discriminator of a string packet.
pub const STRING_TYPE: u8 = 0;

/// Discriminator of a light reading packet.
pub const LIGHT_READING_TYPE: u8 = 1;

const TYPE_OFFSET: usize = 1;
const LENGTH_OFFSET: usize = 2;
const PAYLOAD_OFFSET: usize = 3;
const READING_LEN: usize = 2;

/// Packet types understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Free-form ASCII text from the device.
    String,
    /// Ambient light reading.
    LightReading,
}

impl PacketType {
    /// Returns the wire discriminator for this type.
    pub fn discriminator(self) -> u8 {
        match self {
            Self::String => STRING_TYPE,
            Self::LightReading => LIGHT_READING_TYPE,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> ProtocolResult<Self> {
        match value {
            STRING_TYPE => Ok(Self::String),
            LIGHT_READING_TYPE => Ok(Self::LightReading),
            other => Err(ProtocolError::UnknownDiscriminator(other)),
        }
    }
}

/// A signed 16-bit light level reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LightReading(i16);

impl LightReading {
    /// Wraps a raw sensor value.
    pub const fn new(value: i16) -> Self {
        Self(value)
    }

    /// Returns the raw sensor value.
    pub const fn value(self) -> i16 {
        self.0
    }
}

/// ASCII text sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringMessage(String);

impl StringMessage {
    /// Wraps a text message.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Builds a message from raw bytes; bytes outside ASCII become `?`.
    pub fn from_ascii(bytes: &[u8]) -> Self {
        Self(
            bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
        )
    }

    /// Returns the message text.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Consumes the message, returning its text.
    pub fn into_string(self) -> String {
        self.0
    }
}

/// The typed content of a classified packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message for display.
    Text(StringMessage),
    /// A light reading answering a query.
    Reading(LightReading),
}

impl Message {
    /// Returns the packet type carrying this message.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Text(_) => PacketType::String,
            Self::Reading(_) => PacketType::LightReading,
        }
    }

    /// Builds the raw packet a device would send for this message.
    ///
    /// Text longer than 255 bytes is cut to fit the one-byte length field.
    pub fn to_packet(&self) -> Packet {
        let mut raw = vec![0, self.packet_type().discriminator()];
        match self {
            Self::Text(message) => {
                let text = &message.text().as_bytes()[..message.text().len().min(u8::MAX as usize)];
                raw.push(text.len() as u8);
                raw.extend_from_slice(text);
            }
            Self::Reading(reading) => {
                raw.push(0);
                raw.extend_from_slice(&reading.value().to_le_bytes());
            }
        }
        Packet::new(raw)
    }
}

/// Raw bytes of one decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Bytes,
}

impl Packet {
    /// Wraps already decoded packet bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Decodes a frame (delimiter stripped) into a packet.
    pub fn decode(frame: &[u8]) -> ProtocolResult<Self> {
        Ok(Self::new(decode_frame(frame)?))
    }

    /// Encodes this packet as a delimited line.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.bytes)
    }

    /// Returns the raw packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the packet length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the packet holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads the type discriminator at offset 1.
    pub fn discriminator(&self) -> ProtocolResult<u8> {
        self.byte_at(TYPE_OFFSET)
    }

    /// Resolves the discriminator to a known packet type.
    pub fn packet_type(&self) -> ProtocolResult<PacketType> {
        PacketType::try_from(self.discriminator()?)
    }

    /// Classifies the packet and extracts its payload.
    ///
    /// Every length is validated against the bytes present before anything
    /// is read, so malformed packets surface as errors rather than panics.
    pub fn classify(&self) -> ProtocolResult<Message> {
        match self.packet_type()? {
            PacketType::String => {
                let declared = self.byte_at(LENGTH_OFFSET)? as usize;
                let payload = self.payload("string", declared)?;
                Ok(Message::Text(StringMessage::from_ascii(payload)))
            }
            PacketType::LightReading => {
                let payload = self.payload("light reading", READING_LEN)?;
                let value = i16::from_le_bytes([payload[0], payload[1]]);
                Ok(Message::Reading(LightReading::new(value)))
            }
        }
    }

    fn byte_at(&self, offset: usize) -> ProtocolResult<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(ProtocolError::TooShort {
                len: self.bytes.len(),
                needed: offset + 1,
            })
    }

    fn payload(&self, kind: &'static str, needed: usize) -> ProtocolResult<&[u8]> {
        let available = self.bytes.len().saturating_sub(PAYLOAD_OFFSET);
        if needed > available {
            return Err(ProtocolError::Truncated {
                kind,
                needed,
                available,
            });
        }
        Ok(&self.bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + needed])
    }
}

/// Outbound request for a fresh light reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryCommand;

impl QueryCommand {
    /// Raw command bytes.
    pub const BYTES: [u8; 3] = [0xFF, 0x00, 0x00];

    /// Returns the raw command bytes.
    pub fn as_bytes(&self) -> &'static [u8] {
        &Self::BYTES
    }

    /// Encodes the command as a delimited line.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&Self::BYTES)
    }

    /// Returns true if `raw` is a decoded query command.
    pub fn matches(raw: &[u8]) -> bool {
        raw == Self::BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_reading_dispatches_to_reading() {
        let mut raw = vec![0, LIGHT_READING_TYPE, 0];
        raw.extend_from_slice(&123i16.to_le_bytes());

        let message = Packet::new(raw).classify().unwrap();
        assert_eq!(message, Message::Reading(LightReading::new(123)));
        assert_eq!(message.packet_type(), PacketType::LightReading);
    }

    #[test]
    fn negative_reading_is_little_endian() {
        let packet = Packet::new(vec![9, 1, 0, 0x18, 0xFC]);
        assert_eq!(
            packet.classify().unwrap(),
            Message::Reading(LightReading::new(-1000))
        );
    }

    #[test]
    fn string_packet_yields_declared_text() {
        let packet = Packet::new(b"\x00\x00\x05Hello".to_vec());
        assert_eq!(
            packet.classify().unwrap(),
            Message::Text(StringMessage::new("Hello"))
        );
    }

    #[test]
    fn string_ignores_trailing_bytes_past_declared_length() {
        let packet = Packet::new(b"\x00\x00\x02Hello".to_vec());
        let Message::Text(text) = packet.classify().unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text.text(), "He");
    }

    #[test]
    fn string_non_ascii_bytes_are_replaced() {
        let packet = Packet::new(vec![0, 0, 3, b'a', 0xE9, b'b']);
        let Message::Text(text) = packet.classify().unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text.into_string(), "a?b");
    }

    #[test]
    fn oversized_declared_length_is_truncated_error() {
        let packet = Packet::new(b"\x00\x00\x09Hello".to_vec());
        let err = packet.classify().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                kind: "string",
                needed: 9,
                available: 5
            }
        ));
        assert!(err.is_decode_failure());
    }

    #[test]
    fn short_reading_is_truncated_error() {
        let packet = Packet::new(vec![0, LIGHT_READING_TYPE, 0, 7]);
        assert!(matches!(
            packet.classify(),
            Err(ProtocolError::Truncated {
                needed: 2,
                available: 1,
                ..
            })
        ));

        // Reading without even a length byte.
        let packet = Packet::new(vec![0, LIGHT_READING_TYPE]);
        assert!(matches!(
            packet.classify(),
            Err(ProtocolError::Truncated { available: 0, .. })
        ));
    }

    #[test]
    fn packet_without_discriminator_is_too_short() {
        assert!(matches!(
            Packet::new(vec![0]).classify(),
            Err(ProtocolError::TooShort { len: 1, needed: 2 })
        ));
        assert!(matches!(
            Packet::new(vec![0, STRING_TYPE]).classify(),
            Err(ProtocolError::TooShort { len: 2, needed: 3 })
        ));
    }

    #[test]
    fn unknown_discriminator_is_protocol_violation() {
        let err = Packet::new(vec![0, 7, 0, 1, 2]).classify().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownDiscriminator(7)));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn discriminator_is_read_at_offset_one() {
        // Offset 0 says "reading", offset 1 says "string": offset 1 wins.
        let packet = Packet::new(b"\x01\x00\x02ok".to_vec());
        assert_eq!(packet.packet_type().unwrap(), PacketType::String);
    }

    #[test]
    fn message_to_packet_classifies_back() {
        for message in [
            Message::Reading(LightReading::new(i16::MIN)),
            Message::Reading(LightReading::new(801)),
            Message::Text(StringMessage::new("ready")),
            Message::Text(StringMessage::new("")),
        ] {
            let packet = message.to_packet();
            let line = packet.encode();
            let decoded = Packet::decode(&line[..line.len() - 1]).unwrap();
            assert_eq!(decoded.classify().unwrap(), message);
        }
    }

    #[test]
    fn long_text_is_cut_to_length_field() {
        let message = Message::Text(StringMessage::new("x".repeat(300)));
        let packet = message.to_packet();
        assert_eq!(packet.as_bytes()[2], 255);
        assert_eq!(packet.len(), 3 + 255);
    }

    #[test]
    fn query_command_wire_form() {
        let query = QueryCommand;
        assert_eq!(query.as_bytes(), &[0xFF, 0x00, 0x00]);
        assert_eq!(query.encode(), b"/wAA\n");
        assert!(QueryCommand::matches(&decode_frame(b"/wAA").unwrap()));
        assert!(!QueryCommand::matches(&[0, 0]));
    }
}
