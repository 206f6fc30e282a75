//! # Server-Side Sessions
//!
//! One [`Session`] exists per open WebSocket connection. It is owned exclusively by
//! that connection's pipeline worker (see [`orchestrator`]), so its history is never
//! shared or locked. The [`registry`] only keeps a read-only summary for the HTTP API.
//!
//! ## Session Lifecycle:
//! 1. **Registered**: the upgrade request passed the concurrency limit
//! 2. **Active**: audio units are processed one at a time, in arrival order
//! 3. **Closed**: the socket closed or went idle; the session is dropped with it

pub mod history;
pub mod orchestrator;
pub mod registry;

use crate::agents::AgentProfile;
use chrono::{DateTime, Utc};
use history::ConversationHistory;

pub use orchestrator::{MessageSink, SessionInput, SessionOrchestrator};
pub use registry::{SessionRegistry, SessionSummary, UnitReport};

/// Conversation state for one connection.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub agent: AgentProfile,
    pub history: ConversationHistory,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, agent: AgentProfile, history_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent,
            history: ConversationHistory::new(history_capacity),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
