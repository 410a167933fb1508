//! Job progress tracking
//!
//! [`ProgressTracker`] owns the live [`JobState`] of one import and rewrites
//! its snapshot in the [`JobStore`] after every change. Mutations take the
//! state lock and persist before releasing it, so concurrent updates are
//! never lost and snapshots reach the store in counter order.
//!
//! Persisting is best effort: a failed write is logged and the in-memory
//! state still advances.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use docload_common::job::{generate_job_id, JobState, JobStatus, JobStore};
use docload_common::{DocloadError, Result};
use tracing::{debug, info, warn};

use crate::dispatch::{BatchObserver, BatchOutcome};

#[derive(Debug)]
pub struct ProgressTracker {
    store: JobStore,
    state: Mutex<JobState>,
}

impl ProgressTracker {
    /// Register a new pending job and write its first snapshot.
    ///
    /// The snapshot records only the input file's base name.
    pub fn create(
        store: JobStore,
        job_id: Option<String>,
        table_name: &str,
        input: &Path,
        total_items: u64,
    ) -> Result<Self> {
        let now = Utc::now();
        let job_id = job_id.unwrap_or_else(|| generate_job_id(now));
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());

        // Reject ids that cannot name a snapshot file before anything is written
        store.path_for(&job_id)?;

        let state = JobState::new(job_id, table_name, file_name, total_items, now);
        store.save(&state)?;
        info!(
            job_id = %state.job_id,
            total_items,
            dir = %store.dir().display(),
            "Progress tracking initialized"
        );

        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub fn job_id(&self) -> String {
        self.lock()
            .map(|s| s.job_id.clone())
            .unwrap_or_default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<JobState> {
        Ok(self.lock()?.clone())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.transition(JobStatus::Running)?;
        info!(job_id = %state.job_id, "Job started");
        self.persist(&mut state);
        Ok(())
    }

    /// Add one batch worth of results.
    pub fn update(&self, successful: u64, failed: u64) -> Result<()> {
        let mut state = self.lock()?;
        if state.status.is_terminal() {
            return Err(DocloadError::JobFinished {
                job_id: state.job_id.clone(),
                status: state.status,
            });
        }
        state.record(successful, failed, Utc::now());
        self.persist(&mut state);
        Ok(())
    }

    pub fn complete(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.transition(JobStatus::Completed)?;
        info!(
            job_id = %state.job_id,
            processed = state.processed_items,
            failed = state.failed_items,
            "Job completed"
        );
        self.persist(&mut state);
        Ok(())
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        let mut state = self.lock()?;
        state.transition(JobStatus::Failed)?;
        let message = message.into();
        warn!(job_id = %state.job_id, error = %message, "Job failed");
        state.error_message = Some(message);
        self.persist(&mut state);
        Ok(())
    }

    fn persist(&self, state: &mut JobState) {
        let now = Utc::now();
        state.last_update_time = now;
        state.refresh_statistics(now);
        match self.store.save(state) {
            Ok(()) => debug!(
                job_id = %state.job_id,
                status = %state.status,
                processed = state.processed_items,
                failed = state.failed_items,
                "Saved job snapshot"
            ),
            Err(e) => warn!(job_id = %state.job_id, error = %e, "Failed to save job snapshot"),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, JobState>> {
        self.state
            .lock()
            .map_err(|_| DocloadError::Store("progress state lock poisoned".to_string()))
    }
}

impl BatchObserver for ProgressTracker {
    fn on_batch(&self, outcome: &BatchOutcome) {
        if let Err(e) = self.update(outcome.success_count as u64, outcome.failure_count as u64) {
            warn!(error = %e, "Could not record batch progress");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker(total: u64) -> (tempfile::TempDir, ProgressTracker) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let tracker = ProgressTracker::create(
            store,
            Some("job_test".into()),
            "orders",
            Path::new("/data/in/orders.csv"),
            total,
        )
        .unwrap();
        (dir, tracker)
    }

    fn stored(tracker: &ProgressTracker) -> JobState {
        tracker.store.load("job_test").unwrap()
    }

    #[test]
    fn test_create_persists_pending_snapshot() {
        let (_dir, tracker) = tracker(10);
        let state = stored(&tracker);
        assert_eq!(state.status, JobStatus::Pending);
        assert_eq!(state.current_file, "orders.csv");
        assert_eq!(state.table_name, "orders");
        assert_eq!(tracker.job_id(), "job_test");
    }

    #[test]
    fn test_generates_job_id_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let tracker = ProgressTracker::create(store, None, "t", Path::new("x.csv"), 0).unwrap();
        assert!(tracker.job_id().starts_with("job_"));
    }

    #[test]
    fn test_progress_scenario() {
        let (_dir, tracker) = tracker(100);
        tracker.start().unwrap();

        tracker.update(40, 10).unwrap();
        let state = stored(&tracker);
        assert_eq!(state.processed_items, 40);
        assert_eq!(state.failed_items, 10);
        assert_eq!(state.progress_percentage, 40.0);

        tracker.update(60, 0).unwrap();
        let state = stored(&tracker);
        assert_eq!(state.processed_items, 100);
        assert_eq!(state.progress_percentage, 100.0);
        assert!(state.estimated_completion.is_none());

        tracker.update(5, 0).unwrap();
        assert_eq!(stored(&tracker).progress_percentage, 100.0);
    }

    #[test]
    fn test_lifecycle_and_terminal_state() {
        let (_dir, tracker) = tracker(10);
        assert!(tracker.complete().is_err());

        tracker.start().unwrap();
        tracker.update(3, 0).unwrap();
        tracker.complete().unwrap();
        assert_eq!(stored(&tracker).status, JobStatus::Completed);

        assert!(matches!(
            tracker.update(1, 0),
            Err(DocloadError::JobFinished { .. })
        ));
        assert!(matches!(
            tracker.fail("late"),
            Err(DocloadError::InvalidTransition { .. })
        ));
        let state = stored(&tracker);
        assert_eq!(state.processed_items, 3);
        assert_eq!(state.status, JobStatus::Completed);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_fail_attaches_message() {
        let (_dir, tracker) = tracker(10);
        tracker.fail("schema has no mapping").unwrap();
        let state = stored(&tracker);
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.error_message.as_deref(), Some("schema has no mapping"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_dir, tracker) = tracker(8_000);
        let tracker = Arc::new(tracker);
        tracker.start().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.update(9, 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = stored(&tracker);
        assert_eq!(state.processed_items, 7_200);
        assert_eq!(state.failed_items, 800);
    }

    #[test]
    fn test_observer_records_batches() {
        let (_dir, tracker) = tracker(10);
        tracker.start().unwrap();
        tracker.on_batch(&BatchOutcome::new(4, 1));
        tracker.on_batch(&BatchOutcome::new(2, 0));
        let state = tracker.snapshot().unwrap();
        assert_eq!(state.processed_items, 6);
        assert_eq!(state.failed_items, 1);
    }
}
