//! Line-delimited base64 framing.
//!
//! Every packet travels as one line of standard base64 text:
//!
//! ```text
//! +---------------------------+------+
//! |  base64(raw packet bytes) | '\n' |
//! +---------------------------+------+
//! ```
//!
//! [`FrameSplitter`] carves delimiter-bounded frames out of an arbitrarily
//! chunked byte stream, [`decode_frame`] turns one frame back into raw packet
//! bytes and [`encode_frame`] is its inverse.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::FRAME_DELIMITER;
use crate::error::{ProtocolError, ProtocolResult};

/// Default size of the read buffer used by [`FrameReader`].
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Encodes raw packet bytes as a single delimited line.
///
/// # Example
///
/// ```rust
/// use lightwire_protocol::encode_frame;
///
/// assert_eq!(encode_frame(&[0xFF, 0x00, 0x00]), b"/wAA\n");
/// ```
pub fn encode_frame(raw: &[u8]) -> Vec<u8> {
    let mut line = STANDARD.encode(raw).into_bytes();
    line.push(FRAME_DELIMITER);
    line
}

/// Decodes one frame (delimiter already stripped) into raw packet bytes.
///
/// Surrounding ASCII whitespace is ignored so CRLF line endings decode the
/// same as bare LF. Empty frames and anything that is not valid standard
/// base64 are rejected.
///
/// # Example
///
/// ```rust
/// use lightwire_protocol::decode_frame;
///
/// assert_eq!(decode_frame(b"/wAA").unwrap(), vec![0xFF, 0x00, 0x00]);
/// assert!(decode_frame(b"not*base64").is_err());
/// ```
pub fn decode_frame(frame: &[u8]) -> ProtocolResult<Vec<u8>> {
    let text = frame.trim_ascii();
    if text.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(STANDARD.decode(text)?)
}

/// Accumulates bytes across reads and yields complete frames.
///
/// Frames are emitted in arrival order with the delimiter removed. There is
/// no maximum frame length; an unterminated tail stays buffered until the
/// next delimiter arrives.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to contain no delimiter.
    scanned: usize,
}

impl FrameSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let end = self.scanned + offset;
            frames.push(self.buffer.split_to(end).freeze());
            self.buffer.advance(1);
            self.scanned = 0;
        }
        self.scanned = self.buffer.len();

        frames
    }

    /// Number of buffered bytes not yet terminated by a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any partially accumulated frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

/// Reads frames from an async byte stream.
///
/// `read_frame` is cancel safe: frames already split out of a chunk are kept
/// until the next call.
pub struct FrameReader<R> {
    reader: R,
    splitter: FrameSplitter,
    ready: VecDeque<Bytes>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader with the default read buffer size.
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, DEFAULT_READ_BUFFER)
    }

    /// Creates a reader that reads at most `size` bytes per call.
    pub fn with_buffer_size(reader: R, size: usize) -> Self {
        Self {
            reader,
            splitter: FrameSplitter::new(),
            ready: VecDeque::new(),
            buf: vec![0u8; size.max(1)],
        }
    }

    /// Returns the next complete frame.
    ///
    /// Returns `Ok(None)` at end of stream; an unterminated tail is dropped.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<Bytes>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.splitter.clear();
                return Ok(None);
            }
            self.ready.extend(self.splitter.push(&self.buf[..n]));
        }
    }

    /// Number of bytes buffered towards the next frame.
    pub fn pending_len(&self) -> usize {
        self.splitter.pending_len()
    }

    /// Unwraps this reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes encoded frames to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encodes `raw`, writes the line and flushes it.
    pub async fn write_packet(&mut self, raw: &[u8]) -> ProtocolResult<()> {
        self.writer.write_all(&encode_frame(raw)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
