//! Observer-side cache of job snapshots
//!
//! Pollers (status command, dashboards) read snapshots far more often than
//! the importer rewrites them. A cached entry is served while it is younger
//! than the TTL and the snapshot file's modification time has not changed;
//! otherwise it is reloaded. Entries whose file has disappeared are evicted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use tracing::trace;

use super::{JobState, JobStore};
use crate::error::{DocloadError, Result};

/// Default refresh interval for cached snapshots.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CachedJob {
    state: JobState,
    modified: SystemTime,
    loaded_at: Instant,
}

#[derive(Debug)]
pub struct JobStateCache {
    store: JobStore,
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedJob>>,
}

impl JobStateCache {
    pub fn new(store: JobStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Current snapshot of one job, `None` if it has no snapshot.
    pub fn get(&self, job_id: &str) -> Result<Option<JobState>> {
        let Some(modified) = self.store.modified(job_id)? else {
            self.lock()?.remove(job_id);
            return Ok(None);
        };

        if let Some(entry) = self.lock()?.get(job_id) {
            if entry.modified == modified && entry.loaded_at.elapsed() < self.ttl {
                trace!(job_id = %job_id, "Job snapshot served from cache");
                return Ok(Some(entry.state.clone()));
            }
        }

        let state = match self.store.load(job_id) {
            Ok(state) => state,
            Err(DocloadError::JobNotFound(_)) => {
                self.lock()?.remove(job_id);
                return Ok(None);
            },
            Err(e) => return Err(e),
        };

        self.lock()?.insert(
            job_id.to_string(),
            CachedJob {
                state: state.clone(),
                modified,
                loaded_at: Instant::now(),
            },
        );
        Ok(Some(state))
    }

    /// Every job in the store, refreshed per the cache policy.
    pub fn all(&self) -> Result<Vec<JobState>> {
        let ids = self.store.job_ids()?;
        self.lock()?.retain(|id, _| ids.contains(id));

        let mut jobs = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get(id) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {},
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Skipping unreadable job snapshot"),
            }
        }
        Ok(jobs)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CachedJob>>> {
        self.entries
            .lock()
            .map_err(|_| DocloadError::Store("job cache lock poisoned".to_string()))
    }
}
