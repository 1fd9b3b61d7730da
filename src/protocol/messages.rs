use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::pcm::encode_base64_pcm;
use crate::error::ProtocolError;

/// Content type of a message's `data` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "text/plain")]
    TextPlain,
    /// Base64-encoded PCM16 little-endian
    #[serde(rename = "audio/pcm")]
    AudioPcm,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::TextPlain => "text/plain",
            MimeType::AudioPcm => "audio/pcm",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        match value {
            "text/plain" => Ok(MimeType::TextPlain),
            "audio/pcm" => Ok(MimeType::AudioPcm),
            other => Err(ProtocolError::UnsupportedMimeType(other.to_string())),
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Thought,
    Response,
    Transcription,
    Status,
    Audio,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Thought => "thought",
            MessageType::Response => "response",
            MessageType::Transcription => "transcription",
            MessageType::Status => "status",
            MessageType::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        match value {
            "thought" => Ok(MessageType::Thought),
            "response" => Ok(MessageType::Response),
            "transcription" => Ok(MessageType::Transcription),
            "status" => Ok(MessageType::Status),
            "audio" => Ok(MessageType::Audio),
            other => Err(ProtocolError::UnsupportedMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream timestamp as sent by the backend (number or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Text(text) => f.write_str(text),
        }
    }
}

/// Message exactly as it appears on the wire, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
}

impl WireMessage {
    /// Turn/interrupt signals may legitimately carry no data
    pub fn is_control(&self) -> bool {
        self.turn_complete == Some(true) || self.interrupted == Some(true)
    }
}

/// Validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub session_id: String,
    pub timestamp: Option<Timestamp>,
    pub mime_type: MimeType,
    pub message_type: MessageType,
    pub data: String,
    pub is_final: Option<bool>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

impl ServerMessage {
    pub fn is_audio(&self) -> bool {
        self.mime_type == MimeType::AudioPcm
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete == Some(true)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted == Some(true)
    }
}

impl TryFrom<WireMessage> for ServerMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        validate_message(&wire)?;
        Ok(Self {
            mime_type: MimeType::parse(&wire.mime_type)?,
            message_type: MessageType::parse(&wire.message_type)?,
            session_id: wire.session_id,
            timestamp: wire.timestamp,
            data: wire.data,
            is_final: wire.is_final,
            turn_complete: wire.turn_complete,
            interrupted: wire.interrupted,
        })
    }
}

/// `{"error": ...}` pushed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

/// `{"status": ...}` pushed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
}

/// Any inbound payload; the shapes are told apart by their fields
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundPayload {
    Error(ErrorMessage),
    Status(StatusMessage),
    Message(WireMessage),
}

impl InboundPayload {
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Check every field of an inbound or outbound message.
///
/// Well-formed but unusual combinations (say audio with a `thought` type)
/// pass; deciding what to do with them is up to the caller.
pub fn validate_message(message: &WireMessage) -> Result<(), ProtocolError> {
    MimeType::parse(&message.mime_type)?;
    if message.session_id.trim().is_empty() {
        return Err(ProtocolError::MissingSessionId);
    }
    MessageType::parse(&message.message_type)?;
    if message.data.is_empty() && !message.is_control() {
        return Err(ProtocolError::EmptyData);
    }
    Ok(())
}

/// Outgoing message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMessage {
    mime_type: MimeType,
    data: String,
    session_id: String,
    message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_final: Option<bool>,
}

impl ClientMessage {
    pub fn new(
        session_id: impl Into<String>,
        mime_type: MimeType,
        message_type: MessageType,
        data: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let message = Self {
            mime_type,
            data: data.into(),
            session_id: session_id.into(),
            message_type,
            is_final: None,
        };
        validate_message(&message.to_wire())?;
        Ok(message)
    }

    /// User text turn
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(session_id, MimeType::TextPlain, MessageType::Response, text)
    }

    /// PCM16 samples, base64-encoded
    pub fn audio(session_id: impl Into<String>, samples: &[i16]) -> Result<Self, ProtocolError> {
        Self::new(
            session_id,
            MimeType::AudioPcm,
            MessageType::Audio,
            encode_base64_pcm(samples),
        )
    }

    /// Copy marked as one piece of a chunked send
    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = Some(is_final);
        self
    }

    pub fn mime_type(&self) -> MimeType {
        self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_final(&self) -> Option<bool> {
        self.is_final
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            mime_type: self.mime_type.to_string(),
            data: self.data.clone(),
            session_id: self.session_id.clone(),
            message_type: self.message_type.to_string(),
            timestamp: None,
            turn_complete: None,
            interrupted: None,
            is_final: self.is_final,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
