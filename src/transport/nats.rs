use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use super::backend::{InboundItem, InboundStream, StreamBackend};
use crate::error::TransportError;
use crate::protocol::ClientMessage;

/// NATS flavor of the receive/send channels.
///
/// Subjects:
/// - `{prefix}.{session_id}.{language}.events` carries server payloads
/// - `{prefix}.{session_id}.send` carries client messages
pub struct NatsBackend {
    client: Client,
    prefix: String,
}

impl NatsBackend {
    /// Connect to NATS server
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, TransportError> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Nats(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            prefix: prefix.trim_end_matches('.').to_string(),
        })
    }

    pub fn events_subject(&self, session_id: &str, language: &str) -> String {
        format!("{}.{}.{}.events", self.prefix, session_id, language)
    }

    pub fn send_subject(&self, session_id: &str) -> String {
        format!("{}.{}.send", self.prefix, session_id)
    }
}

#[async_trait]
impl StreamBackend for NatsBackend {
    async fn open(&self, session_id: &str, language: &str) -> Result<InboundStream, TransportError> {
        let subject = self.events_subject(session_id, language);

        info!("Subscribing to events on {}", subject);

        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Nats(format!("Failed to subscribe to {}: {}", subject, e)))?;

        let stream = subscriber.map(|msg| {
            Ok(InboundItem::Payload(
                String::from_utf8_lossy(&msg.payload).into_owned(),
            ))
        });

        Ok(stream.boxed())
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let subject = self.send_subject(message.session_id());
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| TransportError::Nats(format!("Failed to publish to {}: {}", subject, e)))?;
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Nats(format!("Failed to flush: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}
