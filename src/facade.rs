//! Orchestrator facade: the single shared instance every caller goes
//! through.
//!
//! Construction happens once at the process's composition root; consumers
//! receive the same instance behind an `Arc`, so every observer sees one
//! consistent queue and one consistent coverage index - never ambient
//! global state reached by name.
//!
//! Coverage mutations (provider imports/removals) serialize through a
//! write lock; queries clone out the last fully-committed view, so readers
//! never observe a half-imported provider.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::catalog::DestinationResolver;
use crate::coverage::{
    CoverageEntry, CoverageError, CoverageIndex, ImportSummary, LocatorCandidate,
};
use crate::job::{DownloadJob, JobError, JobEvent, JobId, JobManager, JobSpec};
use crate::model::{EntryId, ProviderId, ProviderRecord, Transport};
use crate::provider::NormalizedListing;

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The orchestrator: coverage queries plus download control, one instance
/// per console session.
pub struct Orchestrator {
    index: RwLock<CoverageIndex>,
    jobs: JobManager,
    resolver: Arc<dyn DestinationResolver>,
}

impl Orchestrator {
    /// Wires the facade from its collaborators.
    ///
    /// Intended to be called exactly once and shared via [`Arc`].
    #[must_use]
    pub fn new(
        index: CoverageIndex,
        jobs: JobManager,
        resolver: Arc<dyn DestinationResolver>,
    ) -> Self {
        Self {
            index: RwLock::new(index),
            jobs,
            resolver,
        }
    }

    // ---- Coverage ----

    /// Imports (or re-imports) one provider's normalized listing.
    #[instrument(skip(self, listing), fields(provider = %listing.provider))]
    pub fn import_provider(&self, listing: NormalizedListing) -> ImportSummary {
        write_lock(&self.index).import_provider(listing)
    }

    /// Removes a provider and all of its contributions.
    #[instrument(skip(self))]
    pub fn remove_provider(&self, provider: &ProviderId) {
        write_lock(&self.index).remove_provider(provider);
        info!(provider = %provider, "provider removed");
    }

    /// Returns the coverage view for one entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::UnknownEntry`] for ids outside the catalog.
    pub fn coverage(&self, id: &EntryId) -> Result<CoverageEntry, CoverageError> {
        read_lock(&self.index).coverage(id)
    }

    /// Returns the coverage fraction for one entry, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::UnknownEntry`] for ids outside the catalog.
    pub fn coverage_fraction(&self, id: &EntryId) -> Result<f64, CoverageError> {
        read_lock(&self.index).coverage_fraction(id)
    }

    /// Returns all orphaned provider records, for diagnostics.
    #[must_use]
    pub fn orphans(&self) -> Vec<Arc<ProviderRecord>> {
        read_lock(&self.index).orphans()
    }

    /// Runs a closure against the coverage index read-only.
    ///
    /// For callers that need several queries against one consistent view.
    pub fn with_index<R>(&self, query: impl FnOnce(&CoverageIndex) -> R) -> R {
        query(&read_lock(&self.index))
    }

    // ---- Downloads ----

    /// Enqueues a download for an entry.
    ///
    /// The best candidate locator is chosen from coverage, honoring
    /// `preferred` when a matching locator exists (falling back to the best
    /// overall otherwise). Deduplicated against non-terminal jobs for the
    /// same (entry, provider, locator).
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NoCoverage`] when the entry has no matched
    /// provider (no job is created), [`JobError::UnknownEntry`] for ids
    /// outside the catalog, and [`JobError::EngineUnavailable`] for peer
    /// locators without an engine.
    #[instrument(skip(self), fields(entry = %entry_id))]
    pub async fn enqueue(
        &self,
        entry_id: &EntryId,
        preferred: Option<Transport>,
    ) -> Result<JobId, JobError> {
        let (spec, transport) = {
            let index = read_lock(&self.index);
            let entry = index
                .entry(entry_id)
                .ok_or_else(|| JobError::UnknownEntry(entry_id.clone()))?;
            let candidates = index.best_locator(entry_id)?;
            let chosen = pick_candidate(&candidates, preferred)
                .ok_or_else(|| JobError::NoCoverage(entry_id.clone()))?;

            let destination = self.resolver.resolve(entry, &chosen.provider);
            let spec = JobSpec {
                entry_id: entry_id.clone(),
                provider: chosen.provider.clone(),
                locator: chosen.locator.clone(),
                destination,
                expected_hashes: entry.hashes.clone(),
                expected_size: entry.size,
            };
            (spec, chosen.locator.transport())
        };

        info!(entry = %entry_id, transport = %transport, "enqueueing download");
        self.jobs.submit(spec).await
    }

    /// Pauses an active job.
    ///
    /// # Errors
    ///
    /// See [`JobManager::pause`].
    pub fn pause(&self, id: JobId) -> Result<(), JobError> {
        self.jobs.pause(id)
    }

    /// Resumes a paused job.
    ///
    /// # Errors
    ///
    /// See [`JobManager::resume`].
    pub fn resume(&self, id: JobId) -> Result<(), JobError> {
        self.jobs.resume(id)
    }

    /// Cancels a non-terminal job.
    ///
    /// # Errors
    ///
    /// See [`JobManager::cancel`].
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        self.jobs.cancel(id).await
    }

    /// Returns all jobs, stable-ordered by enqueue time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadJob> {
        self.jobs.snapshot()
    }

    /// Returns one job by id.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<DownloadJob> {
        self.jobs.get(id)
    }

    /// Subscribes to job state-transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    /// Deletes all terminal jobs; returns how many were purged.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] when the checkpoint store fails.
    pub async fn purge_terminal(&self) -> Result<u64, JobError> {
        self.jobs.purge_terminal().await
    }
}

/// Picks the candidate to download from, honoring a transport preference.
///
/// Candidates arrive best-first from the index; a preference narrows to
/// that transport when possible and otherwise falls back to the best
/// overall candidate.
fn pick_candidate<'a>(
    candidates: &'a [LocatorCandidate],
    preferred: Option<Transport>,
) -> Option<&'a LocatorCandidate> {
    if let Some(transport) = preferred {
        if let Some(candidate) = candidates
            .iter()
            .find(|candidate| candidate.locator.transport() == transport)
        {
            return Some(candidate);
        }
    }
    candidates.first()
}
