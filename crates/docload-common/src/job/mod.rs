//! Persisted import job snapshots
//!
//! A [`JobState`] is the single contract between a running import and anyone
//! observing it (status command, dashboards). The importer rewrites the whole
//! snapshot on every change; observers only ever read it.
//!
//! Derived statistics are recomputed from the counters and timestamps each
//! time the snapshot is refreshed. The completion estimate is a straight-line
//! extrapolation of the average throughput so far, so it is noisy during the
//! first seconds of a job and should be read as an approximation.

pub mod cache;
pub mod store;

pub use cache::{JobStateCache, DEFAULT_CACHE_TTL};
pub use store::JobStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DocloadError, Result};

/// Lifecycle of an import job
///
/// `pending -> running -> {completed, failed}`; `pending -> failed` covers
/// jobs that never got to run (bad configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a job id of the form `job_<unix-seconds>_<8 hex chars>`.
pub fn generate_job_id(now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", now.timestamp(), &token[..8])
}

/// Durable snapshot of one import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: String,
    pub table_name: String,
    pub current_file: String,
    pub status: JobStatus,
    pub processed_items: u64,
    pub failed_items: u64,
    /// Best-effort row count from a pre-scan; 0 when unknown
    pub total_items: u64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub progress_percentage: f64,
    /// Seconds since `start_time`
    pub elapsed_time: f64,
    pub items_per_second: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobState {
    pub fn new(
        job_id: impl Into<String>,
        table_name: impl Into<String>,
        current_file: impl Into<String>,
        total_items: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut state = Self {
            job_id: job_id.into(),
            table_name: table_name.into(),
            current_file: current_file.into(),
            status: JobStatus::Pending,
            processed_items: 0,
            failed_items: 0,
            total_items,
            start_time: now,
            last_update_time: now,
            progress_percentage: 0.0,
            elapsed_time: 0.0,
            items_per_second: 0.0,
            estimated_completion: None,
            error_message: None,
        };
        state.refresh_statistics(now);
        state
    }

    /// Move to `next`, rejecting anything the lifecycle does not allow.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DocloadError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Add batch results to the cumulative counters.
    pub fn record(&mut self, processed: u64, failed: u64, now: DateTime<Utc>) {
        self.processed_items = self.processed_items.saturating_add(processed);
        self.failed_items = self.failed_items.saturating_add(failed);
        self.last_update_time = now;
    }

    /// Recompute percentage, elapsed time, throughput and the completion estimate.
    pub fn refresh_statistics(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let processed = self.processed_items as f64;

        self.progress_percentage = if self.total_items > 0 {
            round2(100.0 * processed / self.total_items as f64).min(100.0)
        } else {
            0.0
        };

        let rate = processed / elapsed.max(1.0);
        self.elapsed_time = round2(elapsed);
        self.items_per_second = round2(rate);

        self.estimated_completion = if self.processed_items > 0
            && self.progress_percentage > 0.0
            && self.progress_percentage < 100.0
        {
            let remaining = self.total_items.saturating_sub(self.processed_items) as f64;
            let remaining_ms = (remaining / rate * 1000.0).round() as i64;
            Some(now + Duration::milliseconds(remaining_ms))
        } else {
            None
        };
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
