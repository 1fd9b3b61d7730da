//! Message protocol
//!
//! Wire shapes shared by both directions, validation into typed messages,
//! chunking of long outgoing text and reassembly of chunked inbound text.

mod aggregator;
mod chunk;
pub mod messages;

pub use aggregator::{Aggregator, StreamKey};
pub use chunk::{chunk_message, ChunkIter, MessageChunks};
pub use messages::{
    validate_message, ClientMessage, ErrorMessage, InboundPayload, MessageType, MimeType,
    ServerMessage, StatusMessage, Timestamp, WireMessage,
};
