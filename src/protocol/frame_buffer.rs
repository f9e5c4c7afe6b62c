//! Frame buffer for accumulating partial reads.
//!
//! TCP gives no guarantee that one read carries exactly one command: a line
//! may arrive in several pieces, or several lines may arrive together. The
//! [`FrameBuffer`] collects raw bytes in a `bytes::BytesMut` and splits them
//! on [`FRAME_DELIMITER`].
//!
//! # Example
//!
//! ```
//! use envtrack_ingest::protocol::{Command, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(b"HELO stat").unwrap().is_empty());
//!
//! let frames = buffer.push(b"ion-1\nSIZE 5\n").unwrap();
//! assert_eq!(frames.len(), 2);
//! assert_eq!(frames[0].param(), "station-1");
//! assert_eq!(frames[1].command, Command::Size);
//! ```

use bytes::BytesMut;

use super::Frame;
use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::{IngestError, Result};

/// Byte terminating every inbound frame.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Room for the command token, separator and line ending.
const FRAME_OVERHEAD: usize = 64;

/// Longest UTF-8 encoding of one character.
const MAX_UTF8_CHAR_LEN: usize = 4;

/// Default upper bound for a single frame with the default buffer capacity.
pub const DEFAULT_MAX_FRAME_LEN: usize = max_frame_len_for(DEFAULT_BUFFER_CAPACITY);

/// Frame limit that fits every DATA line a buffer of `capacity` can accept.
///
/// SIZE counts characters, so an acknowledged DATA parameter may take up to
/// four bytes per character on the wire.
pub const fn max_frame_len_for(capacity: usize) -> usize {
    capacity
        .saturating_mul(MAX_UTF8_CHAR_LEN)
        .saturating_add(FRAME_OVERHEAD)
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no delimiter.
    scanned: usize,
    /// Maximum frame length, delimiter included.
    max_frame_len: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a new frame buffer with a custom frame limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len.min(64 * 1024)),
            scanned: 0,
            max_frame_len,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial trailing data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::FrameTooLong`] if a frame exceeds the limit,
    /// whether or not its delimiter has arrived yet.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        let unscanned = &self.buffer[self.scanned..];

        let Some(offset) = unscanned.iter().position(|&b| b == FRAME_DELIMITER) else {
            self.scanned = self.buffer.len();
            if self.buffer.len() > self.max_frame_len {
                return Err(self.too_long(self.buffer.len()));
            }
            return Ok(None);
        };

        let frame_len = self.scanned + offset + 1;
        if frame_len > self.max_frame_len {
            return Err(self.too_long(frame_len));
        }

        let line = self.buffer.split_to(frame_len);
        self.scanned = 0;

        Ok(Some(Frame::parse(&line[..frame_len - 1])))
    }

    fn too_long(&self, length: usize) -> IngestError {
        IngestError::FrameTooLong {
            length,
            max: self.max_frame_len,
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(b"HELO station-1\n").unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Helo);
        assert_eq!(frames[0].param(), "station-1");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer
            .push(b"HELO station-1\nSIZE 5\nDATA hello\nFINI\n")
            .unwrap();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].command, Command::Helo);
        assert_eq!(frames[1].command, Command::Size);
        assert_eq!(frames[2].param(), "hello");
        assert_eq!(frames[3].command, Command::Fini);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_frame() {
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(b"DATA hel").unwrap().is_empty());
        assert_eq!(buffer.len(), 8);

        let frames = buffer.push(b"lo\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].param(), "hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(b"SIZE 3\nDATA a").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Size);

        let frames = buffer.push(b"bc\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].param(), "abc");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut all_frames = Vec::new();

        for byte in b"HELO abc\nFINI\n" {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 2);
        assert_eq!(all_frames[0].param(), "abc");
        assert_eq!(all_frames[1].command, Command::Fini);
    }

    #[test]
    fn test_crlf_frames() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(b"SIZE 5\r\n").unwrap();

        assert_eq!(frames[0].param(), "5");
    }

    #[test]
    fn test_max_frame_len_without_delimiter() {
        let mut buffer = FrameBuffer::with_max_frame_len(8);

        assert!(buffer.push(b"DATA ab").unwrap().is_empty());
        let result = buffer.push(b"cd");

        assert!(matches!(
            result,
            Err(IngestError::FrameTooLong { length: 9, max: 8 })
        ));
    }

    #[test]
    fn test_max_frame_len_with_delimiter() {
        let mut buffer = FrameBuffer::with_max_frame_len(8);

        let result = buffer.push(b"DATA abcd\n");

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_frame_exactly_at_limit() {
        let mut buffer = FrameBuffer::with_max_frame_len(8);

        let frames = buffer.push(b"DATA ab\n").unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].param(), "ab");
    }

    #[test]
    fn test_limit_fits_widest_acceptable_data_line() {
        let capacity = 16;
        let mut buffer = FrameBuffer::with_max_frame_len(max_frame_len_for(capacity));
        let line = format!("DATA {}\r\n", "\u{1F321}".repeat(capacity));

        let frames = buffer.push(line.as_bytes()).unwrap();

        assert_eq!(frames[0].param_len(), capacity);
        assert_eq!(DEFAULT_MAX_FRAME_LEN, max_frame_len_for(DEFAULT_BUFFER_CAPACITY));
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.push(b"DATA partial").unwrap();

        buffer.clear();

        assert!(buffer.is_empty());
        let frames = buffer.push(b"FINI\n").unwrap();
        assert_eq!(frames[0].command, Command::Fini);
    }
}
