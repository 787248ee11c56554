//! In-memory job engine.
//!
//! [`JobRegistry`](registry::JobRegistry) is the single source of truth for
//! job state; [`JobManager`](manager::JobManager) accepts submissions, runs
//! each job on its own Tokio task, and serves the job's output files.

pub mod manager;
pub mod outputs;
pub mod registry;
