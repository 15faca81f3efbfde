//! Line-based codec for Grbl communication.
//!
//! Grbl speaks plain text in both directions. Every line is terminated with
//! a carriage return followed by a line feed (`\r\n`). Bytes arrive in
//! arbitrary chunks, so the codec keeps whatever follows the last delimiter
//! until the next chunk completes it.
//!
//! The buffer is unbounded: a peer that never sends a delimiter makes it grow
//! without limit.

use bytes::{Buf, BytesMut};

/// Line delimiter used in both directions.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Initial buffer capacity. Grbl limits command lines to 80 characters.
const INITIAL_CAPACITY: usize = 256;

/// A codec for reading and writing Grbl lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes received but not yet consumed as a line.
    buffer: BytesMut,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete line from the buffer.
    ///
    /// Returns `None` when no delimiter is buffered yet. Empty lines carry no
    /// meaning and are skipped.
    pub fn decode_line(&mut self) -> Option<String> {
        loop {
            let end = self
                .buffer
                .windows(LINE_DELIMITER.len())
                .position(|window| window == LINE_DELIMITER)?;

            let line_data = self.buffer.split_to(end);
            self.buffer.advance(LINE_DELIMITER.len());

            if !line_data.is_empty() {
                return Some(String::from_utf8_lossy(&line_data).into_owned());
            }
        }
    }

    /// Push a chunk and drain every line it completes.
    pub fn decode_chunk(&mut self, data: &[u8]) -> Vec<String> {
        self.push(data);
        std::iter::from_fn(|| self.decode_line()).collect()
    }

    /// Encode a command for transmission.
    ///
    /// Appends the `\r\n` terminator.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(cmd.len() + LINE_DELIMITER.len());
        buf.extend_from_slice(cmd.as_bytes());
        buf.extend_from_slice(LINE_DELIMITER);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Get the current buffer contents as a string (for debugging).
    pub fn buffer_as_str(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}
