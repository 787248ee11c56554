//! External process execution with incremental output capture.
//!
//! [`run_streaming`] launches one process described by a [`LaunchSpec`],
//! tees its combined stdout/stderr into the job's log file and an
//! [`OutputSink`] as the process writes it, and reports how the process
//! ended. Each call is an
//! independent unit of work; a slow job never holds up another.

pub mod launch;
pub mod stream;

pub use launch::{LaunchSpec, OutputSink, RunError, RunOutcome};
pub use stream::run_streaming;
