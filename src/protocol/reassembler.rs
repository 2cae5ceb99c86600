//! Frame reassembly for the serial-over-BLE notification stream.
//!
//! The onboard controller splits each application-level message across
//! several BLE notifications and marks the final fragment with the ASCII
//! sentinel `"end"`. The reassembler buffers fragments in arrival order and
//! flushes the whole buffer as one [`CompletedFrame`] the instant a
//! terminator-bearing fragment arrives, with the sentinel stripped.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};

/// The 3-byte ASCII sentinel marking the final fragment of a frame.
pub const FRAME_TERMINATOR: &[u8] = b"end";

/// One complete application-level message, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    payload: Bytes,
}

impl CompletedFrame {
    /// The frame payload: all fragments concatenated in arrival order, with
    /// the terminator stripped from the final fragment.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame and return its payload.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the frame carries no payload at all (a bare terminator).
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Hex rendering of the payload, as shown on the vehicle display.
    pub fn to_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Incremental reassembler for terminator-delimited frames.
///
/// Holds at most one in-flight message. The buffer is owned exclusively by
/// the reassembler and never observed externally mid-assembly.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_buffered: usize,
}

impl FrameReassembler {
    /// Create a reassembler with the given buffer cap. A stream that grows
    /// past `max_buffered` bytes without a terminator fails with
    /// [`Error::FrameOverflow`], a fatal condition for the session.
    pub fn new(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Feed one raw notification payload.
    ///
    /// Returns `Ok(Some(frame))` when this fragment completed a message,
    /// `Ok(None)` when more fragments are needed. Empty fragments are the
    /// peripheral's "no data" notifications and are ignored entirely.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<CompletedFrame>> {
        if fragment.is_empty() {
            trace!("Ignoring empty notification fragment");
            return Ok(None);
        }

        if fragment.ends_with(FRAME_TERMINATOR) {
            let body = &fragment[..fragment.len() - FRAME_TERMINATOR.len()];
            self.check_capacity(body.len())?;
            self.buffer.extend_from_slice(body);

            let frame = CompletedFrame {
                payload: self.buffer.split().freeze(),
            };
            trace!(
                "Reassembled frame of {} bytes from notification stream",
                frame.len()
            );
            return Ok(Some(frame));
        }

        self.check_capacity(fragment.len())?;
        self.buffer.extend_from_slice(fragment);
        Ok(None)
    }

    /// Feed one base64-encoded notification payload, as delivered by
    /// transports that hand characteristic values across an encoding
    /// boundary. Decodes before interpretation.
    pub fn push_base64(&mut self, encoded: &str) -> Result<Option<CompletedFrame>> {
        let raw = BASE64.decode(encoded).map_err(|e| Error::InvalidData {
            context: format!("fragment is not valid base64: {e}"),
        })?;
        self.push(&raw)
    }

    /// Number of bytes buffered for the in-progress message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially assembled message.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn check_capacity(&mut self, incoming: usize) -> Result<()> {
        if self.buffer.len() + incoming > self.max_buffered {
            self.buffer.clear();
            return Err(Error::FrameOverflow {
                limit: self.max_buffered,
            });
        }
        Ok(())
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}
