use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::protocol::ClientMessage;

/// One item from a receive channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundItem {
    /// JSON payload of one server event
    Payload(String),
    /// Keep-alive with no payload; still counts as activity
    KeepAlive,
}

/// Inbound items until the channel closes
pub type InboundStream = BoxStream<'static, Result<InboundItem, TransportError>>;

/// Receive and send channels for one backend flavor.
///
/// Implementations:
/// - `SseBackend`: server-sent events in, HTTP POST out
/// - `NatsBackend`: NATS subscription in, NATS publish out
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Open the session's receive channel. Resolves once the channel is
    /// open; the stream ends (or yields an error) when it closes.
    async fn open(&self, session_id: &str, language: &str) -> Result<InboundStream, TransportError>;

    /// Deliver one message on the session's send channel
    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
