//! Frame Chunk Types
//!
//! One inbound video/sensor frame chunk and the strategies for building it
//! from a raw socket read.
//!
//! Deployed peers disagree on what the buffer should carry.
//! [`FrameAssembly::Sentinel`] allocates a fresh zeroed buffer and stores
//! only the read byte count in its last byte; [`FrameAssembly::CopyPayload`]
//! carries the bytes that were actually read. Which one a link uses is a
//! [`crate::config::LinkConfig`] decision.

use serde::{Deserialize, Serialize};

/// One inbound frame chunk.
///
/// `bytes_valid` counts the leading meaningful bytes of `buffer`; readers
/// must not look past it. Equality and hashing compare buffer contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameChunk {
    /// Allocated buffer capacity
    pub capacity: usize,
    /// Backing buffer, always `capacity` bytes long
    pub buffer: Vec<u8>,
    /// Number of leading bytes of `buffer` that are meaningful
    pub bytes_valid: usize,
}

/// Strategy for turning a raw read into a [`FrameChunk`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAssembly {
    /// Fresh zeroed buffer whose last byte holds the read byte count
    /// (truncated to one byte); the payload itself is not carried.
    #[default]
    Sentinel,
    /// Buffer whose leading bytes are the bytes actually read.
    CopyPayload,
}

impl FrameAssembly {
    /// Build a frame record from the bytes of one socket read
    pub fn assemble(&self, payload: &[u8], capacity: usize) -> FrameChunk {
        let mut buffer = vec![0u8; capacity];
        match self {
            FrameAssembly::Sentinel => {
                if let Some(last) = buffer.last_mut() {
                    *last = payload.len() as u8;
                }
            }
            FrameAssembly::CopyPayload => {
                let n = payload.len().min(capacity);
                buffer[..n].copy_from_slice(&payload[..n]);
            }
        }
        FrameChunk {
            capacity,
            buffer,
            bytes_valid: payload.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_assembly() {
        let chunk = FrameAssembly::Sentinel.assemble(&[7u8; 300], 1024);
        assert_eq!(chunk.capacity, 1024);
        assert_eq!(chunk.bytes_valid, 300);
        // Payload is not carried, only the count sentinel in the last byte
        assert!(chunk.buffer[..1023].iter().all(|&b| b == 0));
        // Count truncated to a single byte: 300 % 256
        assert_eq!(chunk.buffer[1023], 44);
    }

    #[test]
    fn test_copy_payload_assembly() {
        let payload = [1u8, 2, 3, 4];
        let chunk = FrameAssembly::CopyPayload.assemble(&payload, 1024);
        assert_eq!(chunk.bytes_valid, 4);
        assert_eq!(&chunk.buffer[..4], &payload);
        assert!(chunk.buffer[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_equality_by_contents() {
        let a = FrameAssembly::CopyPayload.assemble(&[9, 9], 16);
        let b = FrameAssembly::CopyPayload.assemble(&[9, 9], 16);
        assert_eq!(a, b);

        let c = FrameAssembly::CopyPayload.assemble(&[9, 8], 16);
        assert_ne!(a, c);
    }
}
