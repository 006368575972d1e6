//! Job manager: the job queue, per-transport slot pools, the state
//! machine, retry with backoff, and progress broadcasting.
//!
//! # Concurrency Model
//!
//! - Every job gets one driver task for its whole lifetime.
//! - Admission goes through a tokio semaphore per transport kind, so a slow
//!   transport can never starve the other. Semaphore acquisition is FIFO,
//!   which gives first-queued-first-admitted within a pool.
//! - The driver polls backend progress on an interval; its only suspension
//!   points are the pool-slot wait, the progress poll, the backoff sleep
//!   and the pause wait.
//! - The job table is a concurrent map. Each job is written only by its
//!   driver (and the submit path before the driver exists); readers take
//!   cloned snapshots and never block writers.
//!
//! # Cancellation
//!
//! Cancellation is cooperative: the backend is asked to stop and given a
//! bounded ack window. On timeout the job is force-marked `Cancelled` and
//! the handle discarded - the possible resource leak is logged, not hidden.
//! Partial data always stays on disk so a future job can resume it.

mod error;
mod integrity;
mod item;
mod store;

pub use error::JobError;
pub use integrity::verify_artifact;
pub use item::{DownloadJob, JobFailure, JobId, JobKey, JobState};
pub use store::JobStore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::db::Database;
use crate::model::{ContentHashes, EntryId, Locator, ProviderId, Transport};
use crate::transfer::{
    FailureKind, RetryDecision, RetryPolicy, TransferBackend, TransferError, TransferHandle,
    TransferPhase, classify, parse_retry_after,
};

/// Event broadcast on every job state transition.
#[derive(Debug, Clone)]
pub struct JobEvent {
    /// The job that transitioned.
    pub job_id: JobId,
    /// The state it entered.
    pub state: JobState,
}

/// Tuning knobs for the job manager.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Concurrent download slots for the HTTP pool.
    pub http_slots: usize,
    /// Concurrent download slots for the peer-to-peer pool.
    pub peer_slots: usize,
    /// Retry policy for transient transfer failures.
    pub retry: RetryPolicy,
    /// Interval between backend progress polls.
    pub poll_interval: Duration,
    /// How long to wait for a backend to acknowledge cancellation.
    pub cancel_ack_timeout: Duration,
    /// Minimum interval between progress checkpoints while active.
    pub checkpoint_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            http_slots: 4,
            peer_slots: 2,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            cancel_ack_timeout: Duration::from_secs(5),
            checkpoint_interval: Duration::from_secs(3),
        }
    }
}

/// What a caller wants downloaded: one entry from one provider locator.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Target catalog entry.
    pub entry_id: EntryId,
    /// Chosen provider.
    pub provider: ProviderId,
    /// Chosen locator.
    pub locator: Locator,
    /// Resolved destination path.
    pub destination: PathBuf,
    /// Catalog digests the artifact must verify against.
    pub expected_hashes: ContentHashes,
    /// Catalog byte size, when known.
    pub expected_size: Option<u64>,
}

/// Control signal delivered to a job's driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobControl {
    Run,
    Pause,
    Cancel,
}

struct ManagerInner {
    config: JobConfig,
    store: JobStore,
    http_backend: Arc<dyn TransferBackend>,
    peer_backend: Option<Arc<dyn TransferBackend>>,
    http_pool: Arc<Semaphore>,
    peer_pool: Arc<Semaphore>,
    jobs: DashMap<JobId, DownloadJob>,
    active_keys: DashMap<JobKey, JobId>,
    controls: DashMap<JobId, watch::Sender<JobControl>>,
    events: broadcast::Sender<JobEvent>,
    submit_lock: Mutex<()>,
}

/// The job manager.
///
/// Cheap to clone; all clones share one queue. One instance is meant to be
/// owned by the orchestrator facade.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Creates the manager, recovering checkpointed jobs from the store.
    ///
    /// Jobs a previous run left `queued`/`active` come back as `paused` so
    /// the caller can offer to resume them; their dedup identities are
    /// re-registered so duplicate enqueues keep being detected across
    /// restarts. Passing `None` for `peer_backend` marks the peer-to-peer
    /// pool unusable - HTTP jobs remain operable.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] when the checkpoint store fails.
    pub async fn new(
        config: JobConfig,
        db: Database,
        http_backend: Arc<dyn TransferBackend>,
        peer_backend: Option<Arc<dyn TransferBackend>>,
    ) -> Result<Self, JobError> {
        let store = JobStore::new(db);

        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "recovered interrupted jobs as paused");
        }

        let jobs = DashMap::new();
        let active_keys = DashMap::new();
        for job in store.load_all().await? {
            if !job.state.is_terminal() {
                active_keys.insert(job.key(), job.id);
            }
            jobs.insert(job.id, job);
        }

        let (events, _) = broadcast::channel(256);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                http_pool: Arc::new(Semaphore::new(config.http_slots.max(1))),
                peer_pool: Arc::new(Semaphore::new(config.peer_slots.max(1))),
                config,
                store,
                http_backend,
                peer_backend,
                jobs,
                active_keys,
                controls: DashMap::new(),
                events,
                submit_lock: Mutex::new(()),
            }),
        })
    }

    /// Submits a download job.
    ///
    /// Deduplicated by (entry, provider, locator): while a matching job is
    /// non-terminal, re-submitting returns the existing job id. When the
    /// destination file already exists with the expected size, the job is
    /// recorded as `Completed` immediately and no transfer starts.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::EngineUnavailable`] for peer jobs without an
    /// engine, or [`JobError::Store`] when checkpointing fails.
    #[instrument(skip(self, spec), fields(entry = %spec.entry_id, provider = %spec.provider))]
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId, JobError> {
        let inner = &self.inner;
        let transport = spec.locator.transport();
        if transport == Transport::Peer && inner.peer_backend.is_none() {
            return Err(JobError::EngineUnavailable(
                "no peer-to-peer engine configured".to_string(),
            ));
        }

        let _guard = inner.submit_lock.lock().await;

        let key = JobKey {
            entry: spec.entry_id.clone(),
            provider: spec.provider.clone(),
            locator: spec.locator.clone(),
        };
        if let Some(existing) = inner.active_keys.get(&key) {
            let id = *existing;
            debug!(job = id, "duplicate enqueue; returning existing job");
            return Ok(id);
        }

        // Already in the library? Record the job as completed outright.
        if let Ok(metadata) = tokio::fs::metadata(&spec.destination).await {
            let size_matches = spec.expected_size.is_none_or(|size| size == metadata.len());
            if metadata.is_file() && size_matches {
                let mut job = job_record(&spec, transport, JobState::Completed);
                job.bytes_done = metadata.len();
                job.bytes_total = spec.expected_size.or(Some(metadata.len()));
                let (id, created_at) = inner.store.insert(&job).await?;
                job.id = id;
                job.created_at = created_at;
                info!(
                    job = id,
                    path = %spec.destination.display(),
                    "artifact already present; job completed without transfer"
                );
                inner.jobs.insert(id, job);
                let _ = inner.events.send(JobEvent {
                    job_id: id,
                    state: JobState::Completed,
                });
                return Ok(id);
            }
        }

        let mut job = job_record(&spec, transport, JobState::Queued);
        let (id, created_at) = inner.store.insert(&job).await?;
        job.id = id;
        job.created_at = created_at;

        inner.jobs.insert(id, job);
        inner.active_keys.insert(key, id);
        let (control_tx, control_rx) = watch::channel(JobControl::Run);
        inner.controls.insert(id, control_tx);
        let _ = inner.events.send(JobEvent {
            job_id: id,
            state: JobState::Queued,
        });

        tokio::spawn(drive_job(Arc::clone(inner), id, control_rx));
        info!(job = id, transport = %transport, "job enqueued");
        Ok(id)
    }

    /// Pauses an active job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJob`] or [`JobError::InvalidTransition`]
    /// when the job is not currently active.
    pub fn pause(&self, id: JobId) -> Result<(), JobError> {
        let state = self.state_of(id)?;
        if state != JobState::Active {
            return Err(JobError::InvalidTransition {
                id,
                state,
                action: "pause",
            });
        }
        self.send_control(id, JobControl::Pause);
        Ok(())
    }

    /// Resumes a paused job.
    ///
    /// Works both for jobs paused in this session and for jobs recovered
    /// from a previous run (which get a fresh driver task here).
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJob`] or [`JobError::InvalidTransition`]
    /// when the job is not currently paused.
    pub fn resume(&self, id: JobId) -> Result<(), JobError> {
        let state = self.state_of(id)?;
        if state != JobState::Paused {
            return Err(JobError::InvalidTransition {
                id,
                state,
                action: "resume",
            });
        }

        if self.inner.controls.contains_key(&id) {
            self.send_control(id, JobControl::Run);
        } else {
            // Recovered from checkpoint: no driver is running yet.
            let (control_tx, control_rx) = watch::channel(JobControl::Run);
            self.inner.controls.insert(id, control_tx);
            tokio::spawn(drive_job(Arc::clone(&self.inner), id, control_rx));
            debug!(job = id, "spawned driver for recovered job");
        }
        Ok(())
    }

    /// Cancels a job from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJob`] or [`JobError::InvalidTransition`]
    /// when the job is already terminal.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let state = self.state_of(id)?;
        if state.is_terminal() {
            return Err(JobError::InvalidTransition {
                id,
                state,
                action: "cancel",
            });
        }

        if self.inner.controls.contains_key(&id) {
            self.send_control(id, JobControl::Cancel);
        } else {
            // Recovered paused job with no driver: finalize directly.
            self.inner.transition(id, JobState::Cancelled, None).await;
        }
        Ok(())
    }

    /// Returns one job by id.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<DownloadJob> {
        self.inner.jobs.get(&id).map(|job| job.clone())
    }

    /// Returns all jobs, stable-ordered by enqueue time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Subscribes to job state-transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Deletes all terminal jobs from memory and the checkpoint store.
    ///
    /// Jobs are never destroyed implicitly; this is the explicit purge.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] when the store delete fails.
    pub async fn purge_terminal(&self) -> Result<u64, JobError> {
        let purged = self.inner.store.purge_terminal().await?;
        self.inner.jobs.retain(|_, job| !job.state.is_terminal());
        Ok(purged)
    }

    fn state_of(&self, id: JobId) -> Result<JobState, JobError> {
        self.inner
            .jobs
            .get(&id)
            .map(|job| job.state)
            .ok_or(JobError::UnknownJob(id))
    }

    fn send_control(&self, id: JobId, signal: JobControl) {
        if let Some(control) = self.inner.controls.get(&id) {
            // A send failure means the driver just finished; the state
            // check above already reflected the freshest state we had.
            let _ = control.send(signal);
        }
    }
}

impl ManagerInner {
    /// Applies a state transition, checkpoints it and broadcasts the event.
    ///
    /// The machine is enforced at the call sites; an invalid transition
    /// reaching this point is a bug, logged and ignored rather than
    /// corrupting the table.
    async fn transition(&self, id: JobId, next: JobState, failure: Option<JobFailure>) {
        let mut applied = false;
        let mut retry_count = 0;
        if let Some(mut job) = self.jobs.get_mut(&id) {
            if job.state.can_transition(next) {
                job.state = next;
                if failure.is_some() {
                    job.failure = failure.clone();
                }
                retry_count = job.retry_count;
                applied = true;
            } else {
                error!(job = id, from = %job.state, to = %next, "invalid state transition ignored");
            }
        }
        if !applied {
            return;
        }

        if let Err(store_error) = self
            .store
            .record_state(id, next, retry_count, failure.as_ref())
            .await
        {
            warn!(job = id, error = %store_error, "failed to checkpoint state transition");
        }

        if next.is_terminal() {
            if let Some(key) = self.jobs.get(&id).map(|job| job.value().key()) {
                self.active_keys.remove_if(&key, |_, owner| *owner == id);
            }
            self.controls.remove(&id);
        }

        let _ = self.events.send(JobEvent {
            job_id: id,
            state: next,
        });
        debug!(job = id, state = %next, "job transitioned");
    }

    fn backend_for(&self, transport: Transport) -> Option<Arc<dyn TransferBackend>> {
        match transport {
            Transport::Http => Some(Arc::clone(&self.http_backend)),
            Transport::Peer => self.peer_backend.as_ref().map(Arc::clone),
        }
    }

    fn pool_for(&self, transport: Transport) -> Arc<Semaphore> {
        match transport {
            Transport::Http => Arc::clone(&self.http_pool),
            Transport::Peer => Arc::clone(&self.peer_pool),
        }
    }
}

/// Builds the in-memory record for a new job.
fn job_record(spec: &JobSpec, transport: Transport, state: JobState) -> DownloadJob {
    DownloadJob {
        id: 0,
        entry_id: spec.entry_id.clone(),
        provider: spec.provider.clone(),
        locator: spec.locator.clone(),
        transport,
        destination: spec.destination.clone(),
        state,
        bytes_done: 0,
        bytes_total: spec.expected_size,
        expected_hashes: spec.expected_hashes.clone(),
        rate_bytes_per_sec: 0.0,
        degraded: false,
        retry_count: 0,
        failure: None,
        created_at: String::new(),
    }
}

/// Outcome of one transfer attempt.
enum AttemptOutcome {
    Completed,
    Cancelled,
    Failed(TransferError),
}

/// Outcome of an interruptible wait.
enum WaitOutcome {
    Proceed,
    Cancelled,
}

/// Drives one job from admission to a terminal state.
async fn drive_job(
    inner: Arc<ManagerInner>,
    id: JobId,
    mut control: watch::Receiver<JobControl>,
) {
    let Some(job) = inner.jobs.get(&id).map(|job| job.clone()) else {
        return;
    };
    let Some(backend) = inner.backend_for(job.transport) else {
        inner
            .transition(
                id,
                JobState::Failed,
                Some(JobFailure::new(
                    FailureKind::EngineUnavailable,
                    "no peer-to-peer engine configured",
                )),
            )
            .await;
        return;
    };

    // Admission: wait for a slot in this transport's pool, unless the user
    // cancels first. The permit is held until the job is terminal.
    let pool = inner.pool_for(job.transport);
    let _permit = tokio::select! {
        permit = pool.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job = id, "transport pool closed before admission");
                return;
            }
        },
        () = wait_for_cancel(&mut control) => {
            inner.transition(id, JobState::Cancelled, None).await;
            return;
        }
    };

    inner.transition(id, JobState::Active, None).await;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        // Resume from what is actually on disk; the checkpoint can lag a
        // flush, and the partial file is the source of truth.
        let resume_from = tokio::fs::metadata(&job.destination)
            .await
            .map_or(0, |metadata| metadata.len());
        if let Some(mut record) = inner.jobs.get_mut(&id) {
            record.bytes_done = resume_from;
        }

        let outcome = match backend
            .start(&job.locator, &job.destination, resume_from)
            .await
        {
            Ok(handle) => poll_transfer(&inner, id, backend.as_ref(), &handle, &mut control).await,
            Err(error) => AttemptOutcome::Failed(error),
        };

        match outcome {
            AttemptOutcome::Completed => {
                match integrity::verify_artifact(&job.destination, &job.expected_hashes).await {
                    Ok(()) => inner.transition(id, JobState::Completed, None).await,
                    Err(error) => {
                        let kind = classify(&error);
                        warn!(job = id, %error, "artifact failed verification; artifact retained");
                        inner
                            .transition(
                                id,
                                JobState::Failed,
                                Some(JobFailure::new(kind, error.to_string())),
                            )
                            .await;
                    }
                }
                return;
            }
            AttemptOutcome::Cancelled => {
                inner.transition(id, JobState::Cancelled, None).await;
                return;
            }
            AttemptOutcome::Failed(error) => {
                let kind = classify(&error);
                let server_delay = error.retry_after().and_then(parse_retry_after);

                match inner.config.retry.should_retry(kind, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let delay = server_delay.unwrap_or(backoff_delay);
                        warn!(
                            job = id,
                            attempt = next_attempt,
                            max_attempts = inner.config.retry.max_attempts(),
                            delay_ms = delay.as_millis(),
                            using_retry_after = server_delay.is_some(),
                            %error,
                            "retrying transfer"
                        );
                        if let Some(mut record) = inner.jobs.get_mut(&id) {
                            record.retry_count = attempt;
                            record.failure = Some(JobFailure::new(kind, error.to_string()));
                        }
                        match wait_with_control(&inner, id, delay, &mut control).await {
                            WaitOutcome::Proceed => {}
                            WaitOutcome::Cancelled => {
                                inner.transition(id, JobState::Cancelled, None).await;
                                return;
                            }
                        }
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(job = id, %reason, "not retrying transfer");
                        inner
                            .transition(
                                id,
                                JobState::Failed,
                                Some(JobFailure::new(kind, error.to_string())),
                            )
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

/// Polls one running transfer to an attempt outcome, servicing control
/// signals in between ticks.
async fn poll_transfer(
    inner: &ManagerInner,
    id: JobId,
    backend: &dyn TransferBackend,
    handle: &TransferHandle,
    control: &mut watch::Receiver<JobControl>,
) -> AttemptOutcome {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_checkpoint = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let progress = backend.progress(handle);
                if let Some(mut record) = inner.jobs.get_mut(&id) {
                    record.bytes_done = progress.bytes_done;
                    if progress.bytes_total.is_some() {
                        record.bytes_total = progress.bytes_total;
                    }
                    record.rate_bytes_per_sec = progress.rate_bytes_per_sec;
                    record.degraded = record.degraded || progress.degraded;
                }

                if last_checkpoint.elapsed() >= inner.config.checkpoint_interval
                    || progress.phase.is_terminal()
                {
                    last_checkpoint = Instant::now();
                    if let Err(store_error) = inner
                        .store
                        .checkpoint_progress(id, progress.bytes_done, progress.bytes_total)
                        .await
                    {
                        warn!(job = id, error = %store_error, "progress checkpoint failed");
                    }
                }

                match progress.phase {
                    TransferPhase::Completed => return AttemptOutcome::Completed,
                    TransferPhase::Failed => {
                        let error = handle.take_outcome().unwrap_or_else(|| {
                            TransferError::engine(
                                progress
                                    .last_error
                                    .clone()
                                    .unwrap_or_else(|| "transfer failed".to_string()),
                            )
                        });
                        return AttemptOutcome::Failed(error);
                    }
                    TransferPhase::Cancelled => return AttemptOutcome::Cancelled,
                    _ => {}
                }
            }
            changed = control.changed() => {
                let signal = if changed.is_ok() {
                    *control.borrow_and_update()
                } else {
                    JobControl::Cancel
                };
                match signal {
                    JobControl::Cancel => {
                        cancel_with_ack(inner, id, backend, handle).await;
                        return AttemptOutcome::Cancelled;
                    }
                    JobControl::Pause => {
                        if let Err(error) = backend.pause(handle).await {
                            warn!(job = id, %error, "backend pause failed");
                        }
                        let progress = backend.progress(handle);
                        if let Some(mut record) = inner.jobs.get_mut(&id) {
                            record.bytes_done = progress.bytes_done;
                            record.rate_bytes_per_sec = 0.0;
                        }
                        inner.transition(id, JobState::Paused, None).await;
                        if let Err(store_error) = inner
                            .store
                            .checkpoint_progress(id, progress.bytes_done, progress.bytes_total)
                            .await
                        {
                            warn!(job = id, error = %store_error, "pause checkpoint failed");
                        }

                        // Suspended until the user resumes or cancels.
                        loop {
                            if control.changed().await.is_err() {
                                cancel_with_ack(inner, id, backend, handle).await;
                                return AttemptOutcome::Cancelled;
                            }
                            let signal = *control.borrow_and_update();
                            match signal {
                                JobControl::Run => {
                                    inner.transition(id, JobState::Active, None).await;
                                    if let Err(error) = backend.resume(handle).await {
                                        return AttemptOutcome::Failed(error);
                                    }
                                    break;
                                }
                                JobControl::Cancel => {
                                    cancel_with_ack(inner, id, backend, handle).await;
                                    return AttemptOutcome::Cancelled;
                                }
                                JobControl::Pause => {}
                            }
                        }
                    }
                    JobControl::Run => {}
                }
            }
        }
    }
}

/// Asks the backend to cancel and waits (bounded) for acknowledgment.
async fn cancel_with_ack(
    inner: &ManagerInner,
    id: JobId,
    backend: &dyn TransferBackend,
    handle: &TransferHandle,
) {
    let timeout = inner.config.cancel_ack_timeout;
    match tokio::time::timeout(timeout, backend.cancel(handle)).await {
        Ok(Ok(())) => debug!(job = id, "backend acknowledged cancellation"),
        Ok(Err(error)) => {
            warn!(job = id, %error, "backend cancel failed; discarding handle");
        }
        Err(_) => {
            warn!(
                job = id,
                timeout_ms = timeout.as_millis(),
                "backend did not acknowledge cancellation in time; discarding handle (possible resource leak)"
            );
        }
    }

    // Final byte-offset checkpoint so a future job can resume the partial.
    let progress = handle.snapshot();
    if let Some(mut record) = inner.jobs.get_mut(&id) {
        record.bytes_done = progress.bytes_done;
        record.rate_bytes_per_sec = 0.0;
    }
    if let Err(store_error) = inner
        .store
        .checkpoint_progress(id, progress.bytes_done, progress.bytes_total)
        .await
    {
        warn!(job = id, error = %store_error, "cancel checkpoint failed");
    }
}

/// Resolves when the user cancels (or the control channel dies).
async fn wait_for_cancel(control: &mut watch::Receiver<JobControl>) {
    loop {
        if control.changed().await.is_err() {
            return;
        }
        if *control.borrow_and_update() == JobControl::Cancel {
            return;
        }
    }
}

/// Sleeps out a backoff delay while honoring pause and cancel.
async fn wait_with_control(
    inner: &ManagerInner,
    id: JobId,
    delay: Duration,
    control: &mut watch::Receiver<JobControl>,
) -> WaitOutcome {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return WaitOutcome::Proceed,
            changed = control.changed() => {
                let signal = if changed.is_ok() {
                    *control.borrow_and_update()
                } else {
                    JobControl::Cancel
                };
                match signal {
                    JobControl::Cancel => return WaitOutcome::Cancelled,
                    JobControl::Pause => {
                        inner.transition(id, JobState::Paused, None).await;
                        loop {
                            if control.changed().await.is_err() {
                                return WaitOutcome::Cancelled;
                            }
                            let signal = *control.borrow_and_update();
                            match signal {
                                JobControl::Run => {
                                    inner.transition(id, JobState::Active, None).await;
                                    break;
                                }
                                JobControl::Cancel => return WaitOutcome::Cancelled,
                                JobControl::Pause => {}
                            }
                        }
                    }
                    JobControl::Run => {}
                }
            }
        }
    }
}
