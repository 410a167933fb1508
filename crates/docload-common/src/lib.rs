//! Docload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the docload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing subscriber setup
//! - **Jobs**: The persisted job snapshot that observers poll, its file store
//!   and an observer-side cache
//!
//! # Example
//!
//! ```no_run
//! use docload_common::job::{JobStore, JobStatus};
//! use docload_common::Result;
//!
//! fn print_running(store: &JobStore) -> Result<()> {
//!     for job in store.list()? {
//!         if job.status == JobStatus::Running {
//!             println!("{} {}%", job.job_id, job.progress_percentage);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod job;
pub mod logging;

// Re-export commonly used types
pub use error::{DocloadError, Result};
