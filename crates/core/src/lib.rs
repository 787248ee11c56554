//! Domain logic for the drylab job service.
//!
//! Nothing in this crate knows about HTTP. It owns the job data model and
//! its state transitions, the subprocess runner that streams a job's output,
//! and the sandboxed filesystem helpers used to browse and package a job's
//! output directory.

pub mod archive;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod preview;
pub mod runner;
pub mod sandbox;
pub mod tree;
pub mod types;
