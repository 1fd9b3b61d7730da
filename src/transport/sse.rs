//! Server-sent events receive channel with HTTP POST send channel.
//!
//! The receive channel is a long-lived `GET {base}/events/{language}/{session}`
//! answered with `text/event-stream`; every event's data is one JSON payload.
//! Sends are one `POST {base}/send/{session}` per message; any 2xx status
//! means the backend accepted it.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{InboundItem, InboundStream, StreamBackend};
use crate::error::TransportError;
use crate::protocol::ClientMessage;

/// Bytes of a non-2xx response body kept in the error
const MAX_ERROR_BODY: usize = 256;

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks survive intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    event_type: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every item it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<InboundItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            // Blank line marks end of event
            if line.is_empty() {
                if !self.data.is_empty() {
                    if self.event_type.as_deref().unwrap_or("message") == "message" {
                        items.push(InboundItem::Payload(self.data.join("\n")));
                    } else {
                        debug!("Ignoring SSE event type {:?}", self.event_type);
                    }
                }
                self.data.clear();
                self.event_type = None;
                continue;
            }

            if line.starts_with(':') {
                items.push(InboundItem::KeepAlive);
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "event" => self.event_type = Some(value.to_string()),
                _ => {}
            }
        }

        items
    }
}

pub struct SseBackend {
    base_url: String,
    client: Client,
    request_timeout: Duration,
}

impl SseBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn events_url(&self, session_id: &str, language: &str) -> String {
        format!("{}/events/{}/{}", self.base_url, language, session_id)
    }

    pub fn send_url(&self, session_id: &str) -> String {
        format!("{}/send/{}", self.base_url, session_id)
    }
}

async fn error_status(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status {
        status,
        body: truncate_body(body, MAX_ERROR_BODY),
    }
}

/// Cut `body` to at most `max` bytes without splitting a character
fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[async_trait]
impl StreamBackend for SseBackend {
    async fn open(&self, session_id: &str, language: &str) -> Result<InboundStream, TransportError> {
        let url = self.events_url(session_id, language);
        info!("Opening event stream {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let stream = futures::stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::new(), false),
            |(mut bytes, mut decoder, mut queue, done)| async move {
                loop {
                    if let Some(item) = queue.pop_front() {
                        return Some((Ok(item), (bytes, decoder, queue, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => queue.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            let err = TransportError::Network(e.to_string());
                            return Some((Err(err), (bytes, decoder, queue, true)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let url = self.send_url(message.session_id());

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(message)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sse"
    }
}
