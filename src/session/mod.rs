//! Session management
//!
//! This module provides:
//! - `SessionRegistry`: creation, lookup, activation and expiry of sessions
//! - `ConversationStats`: counters for a running conversation

mod registry;
mod stats;

pub use registry::{Session, SessionMetadata, SessionRegistry};
pub use stats::{ConversationStats, StatsSnapshot};
