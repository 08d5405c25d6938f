//! # scheduler: pending future-publication jobs
//!
//! An entry whose `date_stamp` is in the future is saved with
//! `scheduled = true` and a job is registered for it here. When the job fires
//! the entry is re-saved, which flips `scheduled` off once the clock has passed
//! the date and refreshes the blog's cache id.
//!
//! # Lifecycle of a key `(blog_id, path)`
//! `absent -> scheduled -> fired -> absent`, or `scheduled -> cancelled -> absent`.
//!
//! - At most one job exists per key. [`SchedulerRegistry::register`] cancels the
//!   old job and installs the new one under a single lock.
//! - A firing job removes itself before running its callback, so the callback
//!   can re-register or cancel the same key.
//! - Nothing here is persisted. After a restart the entry model re-derives the
//!   table with [`crate::entry::Entries::recover_schedule`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::normalize_path;

/// Runs once when a job fires.
pub type FireCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    blog_id: String,
    path: String,
}

impl JobKey {
    fn new(blog_id: &str, path: &str) -> Self {
        Self {
            blog_id: blog_id.to_string(),
            path: normalize_path(path),
        }
    }
}

struct Job {
    id: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<JobKey, Job>>>;

/// Process-wide table of pending jobs. Construct one per process and share it
/// by reference (`Arc`).
pub struct SchedulerRegistry {
    clock: Arc<dyn Clock>,
    jobs: JobTable,
    next_id: AtomicU64,
}

impl SchedulerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<JobKey, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedules `on_fire` to run at `fire_at`, replacing any job for the key.
    ///
    /// Returns `false` (and leaves no job behind) when `fire_at` is not in the
    /// future or no tokio runtime is available.
    pub fn register(
        &self,
        blog_id: &str,
        path: &str,
        fire_at: DateTime<Utc>,
        on_fire: FireCallback,
    ) -> bool {
        let key = JobKey::new(blog_id, path);
        let now = self.clock.now();
        let mut jobs = self.table();

        if let Some(old) = jobs.remove(&key) {
            old.handle.abort();
            debug!(blog_id, path = %key.path, old_fire_at = %old.fire_at, "[SCHEDULE] Cancelled previous job");
        }

        if fire_at <= now {
            debug!(blog_id, path = %key.path, %fire_at, "[SCHEDULE] Publish date already passed, no job");
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(blog_id, path = %key.path, "[SCHEDULE] No async runtime, cannot schedule job");
            return false;
        };

        let delay = (fire_at - now).to_std().unwrap_or_default();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.jobs);
        let task_key = key.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = {
                let mut jobs = table.lock().unwrap_or_else(|e| e.into_inner());
                match jobs.get(&task_key) {
                    Some(job) if job.id == id => {
                        jobs.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if fired {
                info!(blog_id = %task_key.blog_id, path = %task_key.path, "[SCHEDULE] Job fired");
                on_fire().await;
            }
        });

        info!(blog_id, path = %key.path, %fire_at, "[SCHEDULE] Registered job");
        jobs.insert(key, Job { id, fire_at, handle });
        true
    }

    /// Cancels the job for the key. Safe to call repeatedly or for unknown keys.
    pub fn cancel(&self, blog_id: &str, path: &str) -> bool {
        let key = JobKey::new(blog_id, path);
        match self.table().remove(&key) {
            Some(job) => {
                job.handle.abort();
                info!(blog_id, path = %key.path, "[SCHEDULE] Cancelled job");
                true
            }
            None => false,
        }
    }

    /// When the pending job for the key will fire, if there is one.
    pub fn fire_at(&self, blog_id: &str, path: &str) -> Option<DateTime<Utc>> {
        self.table()
            .get(&JobKey::new(blog_id, path))
            .map(|job| job.fire_at)
    }

    pub fn is_scheduled(&self, blog_id: &str, path: &str) -> bool {
        self.fire_at(blog_id, path).is_some()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
