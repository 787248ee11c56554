use std::sync::Arc;

use crate::engine::manager::JobManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Job registry, execution and output access.
    pub jobs: Arc<JobManager>,
}
