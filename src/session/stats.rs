use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one conversation
#[derive(Debug)]
pub struct ConversationStats {
    started_at: DateTime<Utc>,
    pub frames_captured: AtomicU64,
    pub audio_chunks_sent: AtomicU64,
    pub text_chunks_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub text_messages_received: AtomicU64,
    pub audio_fragments_played: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl Default for ConversationStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            frames_captured: AtomicU64::new(0),
            audio_chunks_sent: AtomicU64::new(0),
            text_chunks_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            text_messages_received: AtomicU64::new(0),
            audio_fragments_played: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }
}

impl ConversationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        StatsSnapshot {
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_captured: load(&self.frames_captured),
            audio_chunks_sent: load(&self.audio_chunks_sent),
            text_chunks_sent: load(&self.text_chunks_sent),
            send_failures: load(&self.send_failures),
            samples_dropped: load(&self.samples_dropped),
            text_messages_received: load(&self.text_messages_received),
            audio_fragments_played: load(&self.audio_fragments_played),
            protocol_errors: load(&self.protocol_errors),
        }
    }
}

/// Point-in-time copy of [`ConversationStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// When the conversation started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    pub frames_captured: u64,
    pub audio_chunks_sent: u64,
    pub text_chunks_sent: u64,
    pub send_failures: u64,

    /// Captured samples lost to ring-buffer overflow
    pub samples_dropped: u64,

    pub text_messages_received: u64,
    pub audio_fragments_played: u64,
    pub protocol_errors: u64,
}
