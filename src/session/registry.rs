//! # Session Registry
//!
//! Tracks which sessions are open, enforces the concurrent session limit, and keeps
//! pipeline counters for the health endpoint.
//!
//! ## Thread Safety:
//! Sessions register from the HTTP upgrade handler and report from their own worker
//! tasks, so the map sits behind a `parking_lot::RwLock`. Only summaries live here;
//! conversation history never leaves its session.

use crate::error::{AppError, PipelineStage};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Read-only view of one active session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub agent_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Turns currently held in the session's history.
    pub message_count: usize,
    pub units_processed: u64,
    pub units_failed: u64,
}

/// Process-wide pipeline counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineTotals {
    pub sessions_opened: u64,
    pub units_completed: u64,
    pub units_rejected: u64,
    pub transcribe_failures: u64,
    pub respond_failures: u64,
    pub synthesize_failures: u64,
}

/// How one audio unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitReport {
    Completed,
    Failed(PipelineStage),
    Rejected,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionSummary>>,
    totals: RwLock<PipelineTotals>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            totals: RwLock::new(PipelineTotals::default()),
            max_concurrent_sessions,
        }
    }

    /// Reserve a slot for a new session and return its id.
    ///
    /// Fails with [`AppError::Capacity`] when the limit is reached.
    pub fn register(&self, agent_name: &str) -> Result<String, AppError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::Capacity(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sessions.insert(
            session_id.clone(),
            SessionSummary {
                session_id: session_id.clone(),
                agent_name: agent_name.to_string(),
                created_at: now,
                last_activity: now,
                message_count: 0,
                units_processed: 0,
                units_failed: 0,
            },
        );
        drop(sessions);

        self.totals.write().sessions_opened += 1;
        Ok(session_id)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Mark `session_id` active now, e.g. when a unit is queued.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.sessions.write().get_mut(session_id) {
            Some(summary) => {
                summary.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Record the outcome of one unit for `session_id`.
    pub fn report(&self, session_id: &str, report: UnitReport, message_count: usize) {
        if let Some(summary) = self.sessions.write().get_mut(session_id) {
            summary.last_activity = Utc::now();
            summary.message_count = message_count;
            match report {
                UnitReport::Completed => summary.units_processed += 1,
                UnitReport::Failed(_) | UnitReport::Rejected => summary.units_failed += 1,
            }
        }

        let mut totals = self.totals.write();
        match report {
            UnitReport::Completed => totals.units_completed += 1,
            UnitReport::Rejected => totals.units_rejected += 1,
            UnitReport::Failed(PipelineStage::Transcribe) => totals.transcribe_failures += 1,
            UnitReport::Failed(PipelineStage::Respond) => totals.respond_failures += 1,
            UnitReport::Failed(PipelineStage::Synthesize) => totals.synthesize_failures += 1,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions.read().get(session_id).cloned()
    }

    /// All active sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    pub fn totals(&self) -> PipelineTotals {
        self.totals.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_enforces_limit() {
        let registry = SessionRegistry::new(2);
        let a = registry.register("default").unwrap();
        let _b = registry.register("tutor").unwrap();
        assert!(matches!(registry.register("x"), Err(AppError::Capacity(_))));

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(registry.register("x").is_ok());
        assert_eq!(registry.totals().sessions_opened, 3);
    }

    #[test]
    fn test_report_updates_summary_and_totals() {
        let registry = SessionRegistry::new(4);
        let id = registry.register("default").unwrap();

        registry.report(&id, UnitReport::Completed, 2);
        registry.report(&id, UnitReport::Failed(PipelineStage::Respond), 3);
        registry.report(&id, UnitReport::Rejected, 3);

        let summary = registry.get(&id).unwrap();
        assert_eq!(summary.units_processed, 1);
        assert_eq!(summary.units_failed, 2);
        assert_eq!(summary.message_count, 3);

        let totals = registry.totals();
        assert_eq!(totals.units_completed, 1);
        assert_eq!(totals.respond_failures, 1);
        assert_eq!(totals.units_rejected, 1);
    }

    #[test]
    fn test_touch_advances_last_activity() {
        let registry = SessionRegistry::new(1);
        let id = registry.register("default").unwrap();
        let before = registry.get(&id).unwrap().last_activity;

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.touch(&id));

        let summary = registry.get(&id).unwrap();
        assert!(summary.last_activity > before);
        assert_eq!(summary.units_processed, 0);
        assert!(!registry.touch("gone"));
    }

    #[test]
    fn test_report_for_unknown_session_only_counts_totals() {
        let registry = SessionRegistry::new(1);
        registry.report("gone", UnitReport::Completed, 0);
        assert_eq!(registry.totals().units_completed, 1);
        assert!(registry.list().is_empty());
    }
}
