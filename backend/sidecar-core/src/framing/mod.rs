//! Length-prefixed framing for the event-ingestion socket.
//!
//! Every message on the wire is a 4-byte big-endian length followed by that
//! many payload bytes. The length counts payload bytes only.
//!
//! A [`FrameCodec`] is stateful and belongs to exactly one connection. Bytes
//! are fed in as they arrive; complete payloads come out in order. A chunk can
//! hold part of a frame, exactly one frame, or several frames back to back.

use crate::error::framing::FramingError;

use common::ErrorLocation;

use std::panic::Location;

pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a single payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Incremental frame parser for one byte stream.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Append `chunk` and return every payload that is now complete.
    ///
    /// Partial frames stay buffered until the rest arrives. A length prefix
    /// above the configured maximum fails the stream; the buffer is cleared
    /// and the caller is expected to drop the connection.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::FrameTooLarge`] when a prefix announces more
    /// than `max_frame_size` payload bytes.
    #[track_caller]
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.buffer.len() >= LENGTH_PREFIX_SIZE {
            let length = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if length > self.max_frame_size {
                self.buffer.clear();
                return Err(FramingError::FrameTooLarge {
                    length,
                    max: self.max_frame_size,
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            let total = LENGTH_PREFIX_SIZE + length;
            if self.buffer.len() < total {
                break;
            }

            let frame = self.buffer[LENGTH_PREFIX_SIZE..total].to_vec();
            self.buffer.drain(..total);
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Prefix `payload` with its big-endian length.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::PayloadTooLarge`] if the payload length does not
    /// fit in the 4-byte prefix.
    #[track_caller]
    pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        let length = u32::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge {
            message: format!(
                "payload of {} bytes does not fit a 4-byte length prefix",
                payload.len()
            ),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
