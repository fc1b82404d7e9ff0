//! Shared application state for the reservation server.
//!
//! A single [`AppState`] is built at startup and shared across every Axum
//! handler via `Arc`.

use std::sync::Arc;

use reservation_core::{Dispatcher, Executor, LeaseOrchestrator, PluginRegistry, Store};

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Lease lifecycle operations (component F).
    pub orchestrator: Arc<LeaseOrchestrator>,
    /// RPC method routing table (component H).
    pub dispatcher: Arc<Dispatcher>,
    /// Per-event handler, reachable directly so an operator can replay a
    /// stuck event without waiting for the next scheduler tick.
    pub executor: Arc<Executor>,
    /// Loaded resource plugins (component A).
    pub plugins: Arc<PluginRegistry>,
    /// The typed store gateway (component B), shared with the scheduler's
    /// background task.
    pub store: Store,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
