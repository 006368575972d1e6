//! Peer-to-peer transfer backend.
//!
//! The wire protocol lives in an external engine reached through the
//! [`TorrentEngine`] capability trait: add a (bundle, file) pair, pause,
//! resume, remove, and poll a last-known progress snapshot. The backend
//! never inspects protocol internals, so the engine is swappable. An engine
//! implementation is expected to reuse one bundle session across several
//! file transfers from the same bundle.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::model::{Locator, Transport};

use super::{TransferBackend, TransferError, TransferHandle, TransferPhase, TransferProgress};
use super::HandleIds;

/// Last-known engine-side snapshot of one transfer.
#[derive(Debug, Clone, Default)]
pub struct EngineProgress {
    /// Bytes of the wanted file downloaded so far.
    pub bytes_done: u64,
    /// Size of the wanted file, when the engine knows it.
    pub bytes_total: Option<u64>,
    /// Download rate in bytes per second.
    pub rate_bytes_per_sec: f64,
    /// Connected peer count.
    pub peer_count: u32,
    /// True once the wanted file is fully present on disk.
    pub finished: bool,
    /// Engine-reported error for this transfer, if any.
    pub error: Option<String>,
}

/// Capability interface of the external peer-to-peer engine.
///
/// `poll` must be non-blocking and return the last-known snapshot; the
/// engine owns its own internal concurrency.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Registers a transfer for one file out of a bundle and starts it.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotInBundle`] when `file` names nothing in
    /// the bundle, or an engine error when the bundle cannot be opened.
    async fn add(
        &self,
        locator: &str,
        file: Option<&str>,
        destination: &Path,
    ) -> Result<u64, TransferError>;

    /// Pauses the transfer.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the transfer cannot be paused.
    async fn pause(&self, transfer: u64) -> Result<(), TransferError>;

    /// Resumes a paused transfer.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the transfer cannot be resumed.
    async fn resume(&self, transfer: u64) -> Result<(), TransferError>;

    /// Removes the transfer, keeping partial data on disk.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the transfer cannot be removed.
    async fn remove(&self, transfer: u64) -> Result<(), TransferError>;

    /// Returns the last-known snapshot, or `None` for unknown transfers.
    fn poll(&self, transfer: u64) -> Option<EngineProgress>;
}

/// Peer-to-peer backend wrapping an external engine.
pub struct TorrentBackend {
    engine: std::sync::Arc<dyn TorrentEngine>,
    transfers: DashMap<u64, u64>,
    ids: HandleIds,
}

impl TorrentBackend {
    /// Wraps an engine behind the uniform transfer interface.
    #[must_use]
    pub fn new(engine: std::sync::Arc<dyn TorrentEngine>) -> Self {
        Self {
            engine,
            transfers: DashMap::new(),
            ids: HandleIds::default(),
        }
    }

    fn engine_id(&self, handle: &TransferHandle) -> Option<u64> {
        self.transfers.get(&handle.id()).map(|entry| *entry)
    }
}

#[async_trait]
impl TransferBackend for TorrentBackend {
    fn kind(&self) -> Transport {
        Transport::Peer
    }

    #[instrument(skip(self, locator), fields(destination = %destination.display()))]
    async fn start(
        &self,
        locator: &Locator,
        destination: &Path,
        _resume_from: u64,
    ) -> Result<TransferHandle, TransferError> {
        let Locator::Peer {
            locator: bundle,
            path,
        } = locator
        else {
            return Err(TransferError::UnsupportedLocator {
                locator: locator.to_string(),
            });
        };

        // The engine resumes from its own on-disk state; the caller's
        // resume offset is not needed here.
        let engine_transfer = self
            .engine
            .add(bundle, path.as_deref(), destination)
            .await?;

        let handle = TransferHandle::new(self.ids.next(), Transport::Peer);
        self.transfers.insert(handle.id(), engine_transfer);
        debug!(bundle = %bundle, engine_transfer, "registered peer transfer");
        Ok(handle)
    }

    async fn pause(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let Some(engine_transfer) = self.engine_id(handle) else {
            return Ok(());
        };
        self.engine.pause(engine_transfer).await?;
        handle.update(|progress| {
            if !progress.phase.is_terminal() {
                progress.phase = TransferPhase::Paused;
                progress.rate_bytes_per_sec = 0.0;
            }
        });
        Ok(())
    }

    async fn resume(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let Some(engine_transfer) = self.engine_id(handle) else {
            return Ok(());
        };
        self.engine.resume(engine_transfer).await?;
        handle.update(|progress| {
            if progress.phase == TransferPhase::Paused {
                progress.phase = TransferPhase::Transferring;
            }
        });
        Ok(())
    }

    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let Some((_, engine_transfer)) = self.transfers.remove(&handle.id()) else {
            return Ok(());
        };
        self.engine.remove(engine_transfer).await?;
        handle.update(|progress| {
            if !progress.phase.is_terminal() {
                progress.phase = TransferPhase::Cancelled;
                progress.rate_bytes_per_sec = 0.0;
            }
        });
        Ok(())
    }

    /// Refreshes the handle from the engine's last-known snapshot, then
    /// returns it. Never blocks: a silent engine just leaves the previous
    /// snapshot in place.
    fn progress(&self, handle: &TransferHandle) -> TransferProgress {
        let engine_transfer = self.engine_id(handle);
        let engine_progress = engine_transfer.and_then(|id| self.engine.poll(id));

        if let Some(engine_progress) = engine_progress {
            if let Some(reason) = engine_progress.error {
                handle.fail(TransferError::engine(reason));
                self.transfers.remove(&handle.id());
            } else {
                handle.update(|progress| {
                    progress.bytes_done = engine_progress.bytes_done;
                    progress.bytes_total = engine_progress.bytes_total;
                    progress.rate_bytes_per_sec = engine_progress.rate_bytes_per_sec;
                    if engine_progress.finished {
                        progress.phase = TransferPhase::Completed;
                        progress.rate_bytes_per_sec = 0.0;
                    } else if progress.phase == TransferPhase::Connecting {
                        progress.phase = TransferPhase::Transferring;
                    }
                });
                if engine_progress.finished {
                    self.transfers.remove(&handle.id());
                }
            }
        }

        handle.snapshot()
    }
}
