use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SessionMetadata = HashMap<String, serde_json::Value>;

/// A logical conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (e.g., "session-6f1c…")
    pub id: String,

    pub created_at: DateTime<Utc>,

    /// Last connect, inbound event, or send
    pub last_activity: DateTime<Utc>,

    /// Whether this is the registry's active session
    pub is_active: bool,

    #[serde(default)]
    pub metadata: SessionMetadata,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<String, Session>,
    active: Option<String>,
}

impl RegistryState {
    fn activate(&mut self, id: &str) {
        if let Some(previous) = self.active.take() {
            if let Some(session) = self.sessions.get_mut(&previous) {
                session.is_active = false;
            }
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.is_active = true;
            self.active = Some(id.to_string());
        }
    }
}

/// Tracks sessions and the single active-session pointer.
///
/// The active pointer is a convenience default, not a lock: callers that
/// pass an explicit session id never consult it. Construct one registry and
/// share it (`Arc<SessionRegistry>`) with the transports that need it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh id and make it the active one
    pub fn create_session(&self, metadata: Option<SessionMetadata>) -> Session {
        let mut state = self.state.write();

        let mut id = format!("session-{}", uuid::Uuid::new_v4());
        while state.sessions.contains_key(&id) {
            id = format!("session-{}", uuid::Uuid::new_v4());
        }

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            created_at: now,
            last_activity: now,
            is_active: false,
            metadata: metadata.unwrap_or_default(),
        };
        state.sessions.insert(id.clone(), session);
        state.activate(&id);

        info!("Created session {}", id);
        state.sessions[&id].clone()
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.state.read().sessions.get(id).cloned()
    }

    pub fn active_session(&self) -> Option<Session> {
        let state = self.state.read();
        state
            .active
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }

    /// Point the active session at `id`. Returns false for unknown ids.
    pub fn set_active_session(&self, id: &str) -> bool {
        let mut state = self.state.write();
        if !state.sessions.contains_key(id) {
            warn!("Cannot activate unknown session {}", id);
            return false;
        }
        state.activate(id);
        if let Some(session) = state.sessions.get_mut(id) {
            session.last_activity = Utc::now();
        }
        true
    }

    /// Mark `id` inactive, clearing the active pointer if it points there
    pub fn deactivate_session(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let Some(session) = state.sessions.get_mut(id) else {
            return false;
        };
        session.is_active = false;
        session.last_activity = Utc::now();

        if state.active.as_deref() == Some(id) {
            state.active = None;
        }
        debug!("Deactivated session {}", id);
        true
    }

    /// Record activity on `id`
    pub fn touch(&self, id: &str) -> bool {
        match self.state.write().sessions.get_mut(id) {
            Some(session) => {
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove inactive sessions idle for longer than `max_age`
    pub fn cleanup_sessions(&self, max_age: Duration) -> usize {
        self.cleanup_sessions_at(Utc::now(), max_age)
    }

    /// [`cleanup_sessions`](Self::cleanup_sessions) against an explicit clock
    pub fn cleanup_sessions_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut state = self.state.write();
        let before = state.sessions.len();

        state
            .sessions
            .retain(|_, session| session.is_active || now - session.last_activity <= max_age);

        let removed = before - state.sessions.len();
        if removed > 0 {
            info!("Cleaned up {} idle sessions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.state.read().sessions.keys().cloned().collect()
    }
}
