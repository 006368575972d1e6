//! Transfer backends: capability-abstracted adapters for HTTP and
//! peer-to-peer transfer behind one uniform interface.
//!
//! The job manager only ever sees [`TransferBackend`]: start a transfer,
//! pause/resume/cancel it through the returned [`TransferHandle`], and poll
//! [`TransferProgress`] snapshots. Backends run their own transfer tasks and
//! publish progress into the handle, so `progress` never blocks.

mod error;
pub mod http;
mod retry;
pub mod torrent;

pub use error::{FailureKind, TransferError, classify};
pub use http::HttpBackend;
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy, parse_retry_after};
pub use torrent::{EngineProgress, TorrentBackend, TorrentEngine};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Locator, Transport};

/// Phase of a transfer, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Request/handshake in flight, no payload bytes yet.
    Connecting,
    /// Payload bytes are flowing.
    Transferring,
    /// Paused by the caller; partial data retained.
    Paused,
    /// All bytes received and flushed.
    Completed,
    /// Cancelled by the caller; partial data retained.
    Cancelled,
    /// The transfer failed; see the handle outcome.
    Failed,
}

impl TransferPhase {
    /// Returns true for phases the transfer cannot leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Last-known progress snapshot of one transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes written to the destination so far.
    pub bytes_done: u64,
    /// Expected total bytes, when known.
    pub bytes_total: Option<u64>,
    /// Observed transfer rate in bytes per second.
    pub rate_bytes_per_sec: f64,
    /// Current phase.
    pub phase: TransferPhase,
    /// Human-readable description of the last error, if any.
    pub last_error: Option<String>,
    /// Set when a resume was requested but the remote does not support
    /// byte ranges and the transfer restarted from zero. A note, not an
    /// error.
    pub degraded: bool,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self {
            bytes_done: 0,
            bytes_total: None,
            rate_bytes_per_sec: 0.0,
            phase: TransferPhase::Connecting,
            last_error: None,
            degraded: false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one in-flight transfer.
///
/// Cheap to clone; the backend that issued it keeps the transfer task and
/// publishes progress through the shared cells in here.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    id: u64,
    transport: Transport,
    progress: Arc<Mutex<TransferProgress>>,
    outcome: Arc<Mutex<Option<TransferError>>>,
}

impl TransferHandle {
    /// Creates a fresh handle in the `Connecting` phase.
    ///
    /// For [`TransferBackend`] implementations; the job manager only ever
    /// receives handles from a backend's `start`.
    #[must_use]
    pub fn new(id: u64, transport: Transport) -> Self {
        Self {
            id,
            transport,
            progress: Arc::new(Mutex::new(TransferProgress::default())),
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the backend-local handle id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the transport this handle belongs to.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the last fully-committed progress snapshot. Never blocks on
    /// an in-flight transfer.
    #[must_use]
    pub fn snapshot(&self) -> TransferProgress {
        lock(&self.progress).clone()
    }

    /// Takes the structured failure, if the transfer failed.
    #[must_use]
    pub fn take_outcome(&self) -> Option<TransferError> {
        lock(&self.outcome).take()
    }

    /// Applies a mutation to the progress snapshot.
    ///
    /// For [`TransferBackend`] implementations publishing progress.
    pub fn update(&self, apply: impl FnOnce(&mut TransferProgress)) {
        apply(&mut lock(&self.progress));
    }

    /// Marks the transfer failed, storing the structured error.
    ///
    /// For [`TransferBackend`] implementations.
    pub fn fail(&self, error: TransferError) {
        let message = error.to_string();
        {
            let mut progress = lock(&self.progress);
            progress.phase = TransferPhase::Failed;
            progress.last_error = Some(message);
            progress.rate_bytes_per_sec = 0.0;
        }
        *lock(&self.outcome) = Some(error);
    }
}

/// Monotonic id source shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct HandleIds(AtomicU64);

impl HandleIds {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Uniform capability interface over both transports.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Returns the transport kind this backend serves.
    fn kind(&self) -> Transport;

    /// Starts (or restarts) a transfer to `destination`.
    ///
    /// `resume_from` is the byte offset of existing partial data; backends
    /// that cannot honor it restart from zero and mark the transfer
    /// degraded.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] when the transfer cannot be started at
    /// all (unsupported locator, immediate HTTP error, engine failure).
    async fn start(
        &self,
        locator: &Locator,
        destination: &Path,
        resume_from: u64,
    ) -> Result<TransferHandle, TransferError>;

    /// Pauses the transfer, retaining partial data.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] when the backend cannot reach the
    /// underlying transfer.
    async fn pause(&self, handle: &TransferHandle) -> Result<(), TransferError>;

    /// Resumes a paused transfer.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] when the transfer cannot be restarted.
    async fn resume(&self, handle: &TransferHandle) -> Result<(), TransferError>;

    /// Cancels the transfer. Partial data is left in place so a future job
    /// can resume it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] when the backend cannot reach the
    /// underlying transfer.
    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError>;

    /// Returns the last-known progress snapshot without blocking.
    fn progress(&self, handle: &TransferHandle) -> TransferProgress {
        handle.snapshot()
    }
}
