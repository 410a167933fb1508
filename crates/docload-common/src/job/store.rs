//! File-backed job snapshot store
//!
//! One `<job_id>.json` file per job inside a progress directory. Every save
//! replaces the whole file atomically, so a reader never observes a partially
//! written snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::JobState;
use crate::error::{DocloadError, Result};

const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Open (and create if needed) the progress directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job_id: &str) -> Result<PathBuf> {
        validate_job_id(job_id)?;
        Ok(self.dir.join(format!("{job_id}.{SNAPSHOT_EXTENSION}")))
    }

    /// Write a complete snapshot, replacing any previous one.
    pub fn save(&self, state: &JobState) -> Result<()> {
        let path = self.path_for(&state.job_id)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| DocloadError::Store(format!("{}: {}", path.display(), e.error)))?;

        debug!(job_id = %state.job_id, status = %state.status, "Saved job snapshot");
        Ok(())
    }

    pub fn load(&self, job_id: &str) -> Result<JobState> {
        let path = self.path_for(job_id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocloadError::JobNotFound(job_id.to_string()))
            },
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Modification time of a job's snapshot, `None` if it does not exist.
    pub fn modified(&self, job_id: &str) -> Result<Option<SystemTime>> {
        let path = self.path_for(job_id)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every job with a snapshot in the directory, sorted.
    pub fn job_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every readable snapshot; unreadable ones are logged and skipped.
    pub fn list(&self) -> Result<Vec<JobState>> {
        let mut jobs = Vec::new();
        for job_id in self.job_ids()? {
            match self.load(&job_id) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job_id = %job_id, error = %e, "Skipping unreadable job snapshot"),
            }
        }
        Ok(jobs)
    }
}

fn validate_job_id(job_id: &str) -> Result<()> {
    let valid = !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !job_id.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(DocloadError::Config(format!("Invalid job id: {job_id:?}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("progress")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (_dir, store) = store();
        let mut job = JobState::new("job_42", "users", "users.csv", 10, Utc::now());
        job.transition(JobStatus::Running).unwrap();
        store.save(&job).unwrap();

        let loaded = store.load("job_42").unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.table_name, "users");
        assert_eq!(loaded.total_items, 10);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let (_dir, store) = store();
        let mut job = JobState::new("job_1", "t", "f.csv", 10, Utc::now());
        store.save(&job).unwrap();
        job.record(3, 1, Utc::now());
        store.save(&job).unwrap();

        assert_eq!(store.load("job_1").unwrap().processed_items, 3);
        assert_eq!(store.job_ids().unwrap(), vec!["job_1".to_string()]);
    }

    #[test]
    fn test_load_missing_job() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("job_missing"),
            Err(DocloadError::JobNotFound(_))
        ));
        assert!(store.modified("job_missing").unwrap().is_none());
    }

    #[test]
    fn test_list_skips_garbage_and_foreign_files() {
        let (_dir, store) = store();
        store
            .save(&JobState::new("job_a", "t", "a.csv", 0, Utc::now()))
            .unwrap();
        std::fs::write(store.dir().join("job_b.json"), b"{ not json").unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"hello").unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "job_a");
    }

    #[test]
    fn test_rejects_path_like_job_ids() {
        let (_dir, store) = store();
        assert!(store.path_for("../escape").is_err());
        assert!(store.path_for("a/b").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("job_1700000000_abcd1234").is_ok());
    }
}
