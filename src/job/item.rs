//! Download job record and state machine.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{ContentHashes, EntryId, Locator, ProviderId, Transport};
use crate::transfer::FailureKind;

/// Job identifier, assigned by the checkpoint store.
pub type JobId = i64;

/// State of a download job.
///
/// The machine is `Queued -> Active -> {Completed | Failed | Cancelled}`
/// with `Active <-> Paused` as a user-driven side path; any non-terminal
/// state may move to `Cancelled`. Transitions are monotonic: once terminal,
/// a job never changes state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a slot in its transport pool.
    Queued,
    /// Occupying a worker; transfer in flight (or backing off a retry).
    Active,
    /// Suspended by the user; partial data retained.
    Paused,
    /// Transfer finished and integrity verified.
    Completed,
    /// Failed permanently; see the retained failure.
    Failed,
    /// Cancelled by the user; always distinct from `Failed`.
    Cancelled,
}

impl JobState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states a job can never leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true when the state machine permits `self -> next`.
    #[must_use]
    pub fn can_transition(&self, next: JobState) -> bool {
        match (self, next) {
            // Any non-terminal state can be cancelled.
            (state, Self::Cancelled) if !state.is_terminal() => true,
            (Self::Queued, Self::Active) => true,
            (Self::Active, Self::Paused | Self::Completed | Self::Failed) => true,
            (Self::Paused, Self::Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid job state: {s}")),
        }
    }
}

/// Terminal failure retained on a failed job for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Classified failure kind.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl JobFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Deduplication identity of a job: one (entry, provider, locator) triple
/// may have at most one non-terminal job at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Target catalog entry.
    pub entry: EntryId,
    /// Chosen provider.
    pub provider: ProviderId,
    /// Chosen locator.
    pub locator: Locator,
}

/// One unit of download work, owned exclusively by the job manager until
/// terminal and destroyed only on explicit purge.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Identifier, assigned by the checkpoint store.
    pub id: JobId,
    /// Target catalog entry.
    pub entry_id: EntryId,
    /// Chosen provider.
    pub provider: ProviderId,
    /// Chosen locator.
    pub locator: Locator,
    /// Transport kind (derived from the locator, denormalized for pools).
    pub transport: Transport,
    /// Resolved destination path.
    pub destination: PathBuf,
    /// Current state.
    pub state: JobState,
    /// Bytes transferred so far.
    pub bytes_done: u64,
    /// Expected total bytes, when known.
    pub bytes_total: Option<u64>,
    /// Catalog digests the finished artifact must hash to.
    pub expected_hashes: ContentHashes,
    /// Last observed transfer rate in bytes per second.
    pub rate_bytes_per_sec: f64,
    /// Set when a resume had to restart from zero (no range support).
    pub degraded: bool,
    /// Retry attempts consumed so far.
    pub retry_count: u32,
    /// Failure retained after a terminal `Failed` (or the last error seen
    /// before a retry).
    pub failure: Option<JobFailure>,
    /// Enqueue timestamp, from the store (`datetime('now')`).
    pub created_at: String,
}

impl DownloadJob {
    /// Returns the dedup identity of this job.
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey {
            entry: self.entry_id.clone(),
            provider: self.provider.clone(),
            locator: self.locator.clone(),
        }
    }

    /// Returns completed fraction in `[0, 1]`, when the total is known.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        self.bytes_total.filter(|total| *total > 0).map(|total| {
            #[allow(clippy::cast_precision_loss)]
            let fraction = self.bytes_done as f64 / total as f64;
            fraction.min(1.0)
        })
    }
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadJob {{ id: {}, entry: {}, provider: {}, state: {} }}",
            self.id, self.entry_id, self.provider, self.state
        )
    }
}
