pub mod backend;
pub mod client;
pub mod nats;
pub mod sse;
pub mod state;

pub use backend::{InboundItem, InboundStream, StreamBackend};
pub use client::{StreamingTransport, TransportEvent};
pub use nats::NatsBackend;
pub use sse::{SseBackend, SseDecoder};
pub use state::{ConnectionMachine, ConnectionState, RetryDecision};

use std::sync::Arc;

use crate::config::{BackendKind, TransportConfig};
use crate::error::TransportError;

/// Build the backend selected in `config`
pub async fn backend_from_config(
    config: &TransportConfig,
) -> Result<Arc<dyn StreamBackend>, TransportError> {
    match config.backend {
        BackendKind::Sse => Ok(Arc::new(SseBackend::new(
            &config.base_url,
            config.request_timeout(),
        )?)),
        BackendKind::Nats => Ok(Arc::new(
            NatsBackend::connect(&config.nats_url, &config.nats_prefix).await?,
        )),
    }
}
