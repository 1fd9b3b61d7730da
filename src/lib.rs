pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod rate_limit;
pub mod session;
pub mod transport;

pub use audio::{
    AudioCaptureGraph, AudioFrame, AudioOutput, CaptureState, InputDevice, NoiseGate,
    PlaybackScheduler, SampleRing, WavFileDevice, WavFileOutput,
};
pub use config::Config;
pub use error::{CaptureError, PcmError, ProtocolError, SendError, TransportError};
pub use pipeline::{AudioUplink, Conversation, ConversationEvent, InboundHandler};
pub use protocol::{chunk_message, Aggregator, ClientMessage, MessageType, MimeType, ServerMessage};
pub use rate_limit::RateLimiter;
pub use session::{ConversationStats, Session, SessionRegistry, StatsSnapshot};
pub use transport::{ConnectionState, StreamBackend, StreamingTransport, TransportEvent};
