//! Error types for the streaming core.
//!
//! Each component owns a small error enum. Library callers match on these;
//! the binary folds them into `anyhow::Error`.

use thiserror::Error;

/// Errors from the PCM codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PcmError {
    /// Byte buffer length is not a multiple of the 16-bit sample width
    #[error("PCM buffer has odd length {0}; expected whole 16-bit samples")]
    OddLength(usize),

    /// Payload was not valid base64
    #[error("Invalid base64 audio payload: {0}")]
    Base64(String),
}

/// Malformed or unsupported protocol messages.
///
/// The offending message is dropped; processing continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unsupported mime_type: {0:?}")]
    UnsupportedMimeType(String),

    #[error("Unsupported message_type: {0:?}")]
    UnsupportedMessageType(String),

    #[error("Message data is empty")]
    EmptyData,

    #[error("Message is missing session_id")]
    MissingSessionId,

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    /// Payload was not JSON of any known shape
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Name of the wire field that caused the rejection, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ProtocolError::UnsupportedMimeType(_) => Some("mime_type"),
            ProtocolError::UnsupportedMessageType(_) => Some("message_type"),
            ProtocolError::EmptyData => Some("data"),
            ProtocolError::MissingSessionId => Some("session_id"),
            ProtocolError::InvalidChunkSize | ProtocolError::Malformed(_) => None,
        }
    }
}

/// Errors from the audio capture graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Microphone access denied. Recoverable by user action.
    #[error("Microphone permission denied: {0}")]
    Permission(String),

    /// Processing stage or device setup failed
    #[error("Capture initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid capture state: {0}")]
    InvalidState(String),

    /// Re-entrant start would double-buffer
    #[error("Capture already in progress")]
    AlreadyCapturing,

    #[error("Audio device error: {0}")]
    Device(String),
}

/// Errors from the streaming transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request or connection failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-2xx status
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Receive channel closed")]
    Closed,

    #[error("Receive channel stale: no events for {silent_ms}ms")]
    Stale { silent_ms: u64 },

    /// Terminal: the transport gave up and will not self-heal
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Invalid transport config: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Whether this error ends the transport's life.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::ReconnectExhausted { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Errors from an outgoing conversation send.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
