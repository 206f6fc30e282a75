//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket upgrade.
//!
//! ## What is shared:
//! - **config**: the effective configuration, behind a lock so it can be swapped
//! - **providers**: one Transcriber/Responder/Synthesizer, used by every session
//! - **registry**: summaries of open sessions and pipeline counters
//! - **agents**: the agent profile loader
//!
//! Conversation history is deliberately *not* here: each session owns its own.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same data
//! - **RwLock**: many readers or one writer. `parking_lot`'s lock never poisons, so
//!   reads don't need an `unwrap`.

use crate::agents::AgentCatalog;
use crate::config::AppConfig;
use crate::providers::ProviderSet;
use crate::session::SessionRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub providers: ProviderSet,
    pub registry: Arc<SessionRegistry>,
    pub agents: AgentCatalog,
    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, providers: ProviderSet) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions)),
            agents: AgentCatalog::new(&config.agents),
            config: Arc::new(RwLock::new(config)),
            providers,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
