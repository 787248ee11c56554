/// Jobs are keyed by opaque string ids (`job-001`, `job-002`, ...).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
