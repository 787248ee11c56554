use chrono::Utc;
use drylab_core::job::{JobRecord, JobRequest};
use drylab_core::types::JobId;
use indexmap::IndexMap;
use tokio::sync::RwLock;

/// Authoritative store of every job submitted during this process lifetime.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared between request handlers and the per-job execution tasks. Every
/// mutation holds the write lock for its whole duration, so readers never
/// observe a half-applied change.
///
/// Records are never evicted.
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    /// Insertion-ordered, so listings come back in submission order.
    jobs: IndexMap<JobId, JobRecord>,
    /// Last sequence number handed out. Never decreases.
    last_seq: u64,
}

impl JobRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                jobs: IndexMap::new(),
                last_seq: 0,
            }),
        }
    }

    /// Allocate a fresh id and store a `Running` record for `request`.
    ///
    /// Returns a snapshot of the stored record.
    pub async fn create(&self, request: &JobRequest) -> JobRecord {
        let mut inner = self.inner.write().await;
        inner.last_seq += 1;
        let id = format!("job-{:03}", inner.last_seq);
        let record = JobRecord::new(id.clone(), request, Utc::now());
        inner.jobs.insert(id, record.clone());
        record
    }

    /// Snapshot of a single job.
    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    /// Snapshot of every job, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.inner.read().await.jobs.values().cloned().collect()
    }

    /// Apply `mutate` to a job under the write lock.
    ///
    /// Returns `None` if the id is unknown.
    pub async fn update<R>(&self, id: &str, mutate: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        let mut inner = self.inner.write().await;
        inner.jobs.get_mut(id).map(mutate)
    }

    /// Number of jobs currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
