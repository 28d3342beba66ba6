//! Protocol module
//!
//! Wire-level types exchanged over a session.
//!
//! This module contains:
//! - `ChatMessage`: `<sender>#<body>` text message codec
//! - `FrameChunk` / `FrameAssembly`: inbound frame records and the
//!   strategies for building them from raw reads

pub mod frame;
pub mod message;

// Re-exports for convenience
pub use frame::{FrameAssembly, FrameChunk};
pub use message::{ChatMessage, MESSAGE_DELIMITER};

/// One demultiplexed inbound payload.
///
/// A session read loop classifies every chunk it pulls off the socket into
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// A decoded text message
    Message(ChatMessage),
    /// A frame/sensor chunk
    Frame(FrameChunk),
}
