use std::collections::HashMap;
use tracing::debug;

use super::messages::ServerMessage;

/// Identity of one logical message stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub session_id: String,
    /// Rendered timestamp; empty when the backend sent none
    pub timestamp: String,
}

impl StreamKey {
    pub fn of(message: &ServerMessage) -> Self {
        Self {
            session_id: message.session_id.clone(),
            timestamp: message
                .timestamp
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Reassembles chunked messages per stream key.
///
/// A key's buffer only grows until a fragment marked `is_final` arrives,
/// at which point the whole text is returned and the key is forgotten.
#[derive(Debug, Default)]
pub struct Aggregator {
    partial: HashMap<StreamKey, Vec<String>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the assembled message when `message` finalizes its stream
    pub fn add_chunk(&mut self, message: &ServerMessage) -> Option<String> {
        let key = StreamKey::of(message);

        if message.is_final != Some(true) {
            self.partial
                .entry(key)
                .or_default()
                .push(message.data.clone());
            return None;
        }

        let mut parts = self.partial.remove(&key).unwrap_or_default();
        parts.push(message.data.clone());
        debug!(
            "Assembled {} fragments for {}@{}",
            parts.len(),
            key.session_id,
            key.timestamp
        );
        Some(parts.concat())
    }

    /// Streams with fragments still waiting for `is_final`
    pub fn pending_streams(&self) -> usize {
        self.partial.len()
    }

    pub fn is_pending(&self, key: &StreamKey) -> bool {
        self.partial.contains_key(key)
    }

    /// Drop a stream's fragments without assembling them
    pub fn discard(&mut self, key: &StreamKey) -> bool {
        self.partial.remove(key).is_some()
    }

    /// Drop every pending stream of `session_id`, returning how many went
    pub fn discard_session(&mut self, session_id: &str) -> usize {
        let before = self.partial.len();
        self.partial.retain(|key, _| key.session_id != session_id);
        before - self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}
