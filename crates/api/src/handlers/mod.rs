pub mod jobs;
pub mod outputs;
