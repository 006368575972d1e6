//! Error types for job management.

use thiserror::Error;

use crate::model::EntryId;

use super::item::{JobId, JobState};

/// Errors surfaced by the job manager and the orchestrator facade.
#[derive(Debug, Error)]
pub enum JobError {
    /// The entry has no matched provider; no job was created.
    #[error("no provider covers entry {0}")]
    NoCoverage(EntryId),

    /// The entry id is not part of the loaded catalog.
    #[error("unknown catalog entry: {0}")]
    UnknownEntry(EntryId),

    /// No job exists with this id.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    /// The requested control operation is not valid in the job's state.
    #[error("job {id} is {state} and cannot {action}")]
    InvalidTransition {
        /// The job.
        id: JobId,
        /// Its current state.
        state: JobState,
        /// The rejected operation.
        action: &'static str,
    },

    /// The peer-to-peer engine is unusable; peer jobs cannot be accepted.
    /// HTTP jobs remain operable.
    #[error("peer-to-peer transport unavailable: {0}")]
    EngineUnavailable(String),

    /// The checkpoint store failed.
    #[error("checkpoint store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<crate::coverage::CoverageError> for JobError {
    fn from(error: crate::coverage::CoverageError) -> Self {
        match error {
            crate::coverage::CoverageError::UnknownEntry(id) => Self::UnknownEntry(id),
        }
    }
}
