//! Wire protocol between the host and the light sensor controller.
//!
//! # Protocol Overview
//!
//! The serial link carries one packet per line:
//! - the raw packet bytes, encoded as standard base64
//! - followed by a single `\n` delimiter
//!
//! Decoded packets carry a type discriminator at offset 1. Type `0` is an
//! ASCII string whose length is given at offset 2; type `1` is a signed
//! 16-bit little-endian light reading at offset 3. The host asks for a
//! reading by sending the three byte [`QueryCommand`] `[0xFF, 0x00, 0x00]`.
//!
//! # Example
//!
//! ```rust
//! use lightwire_protocol::{FrameSplitter, LightReading, Message, Packet};
//!
//! let mut splitter = FrameSplitter::new();
//! let frames = splitter.push(b"AAEAewA=\n");
//! let packet = Packet::decode(&frames[0]).unwrap();
//! assert_eq!(packet.classify().unwrap(), Message::Reading(LightReading::new(123)));
//! ```

mod error;
mod framing;
mod packet;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{
    DEFAULT_READ_BUFFER, FrameReader, FrameSplitter, FrameWriter, decode_frame, encode_frame,
};
pub use packet::{
    LIGHT_READING_TYPE, LightReading, Message, Packet, PacketType, QueryCommand, STRING_TYPE,
    StringMessage,
};

/// Byte terminating every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'\n';
