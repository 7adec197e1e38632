//! Frame types delivered by the capture layer

use std::sync::Arc;

/// Largest payload a single protocol frame can carry (2^24 - 1).
///
/// A frame of exactly this length means the logical message continues in the next frame.
pub const MAX_PAYLOAD_LEN: usize = 0x00ff_ffff;

/// Flow direction of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// One protocol-layer fragment as reassembled from the TCP stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number (wraps at 256)
    pub seq: u8,

    /// Which peer sent the frame
    pub direction: Direction,

    /// Capture timestamp, nanoseconds since the Unix epoch
    pub timestamp: u64,

    /// Frame payload without the 4-byte header
    pub payload: Arc<[u8]>,
}

impl Frame {
    /// Create a new frame
    pub fn new(seq: u8, direction: Direction, timestamp: u64, payload: impl Into<Arc<[u8]>>) -> Self {
        Self { seq, direction, timestamp, payload: payload.into() }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty (a zero-length terminator frame)
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True when the frame fills the fragmentation boundary, so more fragments follow.
    pub fn is_max_size(&self, max_payload: usize) -> bool {
        self.payload.len() >= max_payload
    }
}
