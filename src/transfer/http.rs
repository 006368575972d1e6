//! HTTP transfer backend with resumable range requests.
//!
//! Each started transfer runs in its own task that streams the response
//! body to disk and publishes progress into the [`TransferHandle`]. Resume
//! works through `Range: bytes=N-`; when the remote answers `200` instead
//! of `206` the transfer restarts from zero and the snapshot is marked
//! degraded, which is a note for the caller, never an error.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::{RANGE, RETRY_AFTER};
use reqwest::{Client, Response};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::{Locator, Transport};

use super::{HandleIds, TransferBackend, TransferError, TransferHandle, TransferPhase};

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle-read timeout; a stalled stream errors out instead of hanging.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Control signal for a running stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamControl {
    Run,
    Pause,
    Cancel,
}

/// Per-transfer state kept by the backend.
struct HttpState {
    url: String,
    destination: PathBuf,
    control: watch::Sender<StreamControl>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// HTTP transfer backend.
pub struct HttpBackend {
    client: Client,
    states: Arc<DashMap<u64, HttpState>>,
    ids: HandleIds,
}

impl HttpBackend {
    /// Creates the backend with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ClientBuild`] when the underlying client
    /// cannot be constructed.
    pub fn new() -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(TransferError::ClientBuild)?;
        Ok(Self {
            client,
            states: Arc::new(DashMap::new()),
            ids: HandleIds::default(),
        })
    }
}

#[async_trait]
impl TransferBackend for HttpBackend {
    fn kind(&self) -> Transport {
        Transport::Http
    }

    #[instrument(skip(self, locator), fields(destination = %destination.display(), resume_from))]
    async fn start(
        &self,
        locator: &Locator,
        destination: &Path,
        resume_from: u64,
    ) -> Result<TransferHandle, TransferError> {
        let Locator::Http { url } = locator else {
            return Err(TransferError::UnsupportedLocator {
                locator: locator.to_string(),
            });
        };

        let handle = TransferHandle::new(self.ids.next(), Transport::Http);
        let (control_tx, control_rx) = watch::channel(StreamControl::Run);

        // Register the state before the task exists so a fast transfer's
        // self-cleanup always finds its entry.
        self.states.insert(
            handle.id(),
            HttpState {
                url: url.clone(),
                destination: destination.to_path_buf(),
                control: control_tx,
                task: Mutex::new(None),
            },
        );

        match begin_attempt(
            self.client.clone(),
            handle.clone(),
            url.clone(),
            destination.to_path_buf(),
            resume_from,
            control_rx,
            Arc::clone(&self.states),
        )
        .await
        {
            Ok(task) => {
                if let Some(state) = self.states.get(&handle.id()) {
                    *lock(&state.task) = Some(task);
                }
                Ok(handle)
            }
            Err(error) => {
                self.states.remove(&handle.id());
                Err(error)
            }
        }
    }

    async fn pause(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let task = {
            let Some(state) = self.states.get(&handle.id()) else {
                // Transfer already reached a terminal phase.
                return Ok(());
            };
            let _ = state.control.send(StreamControl::Pause);
            lock(&state.task).take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    async fn resume(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let snapshot = handle.snapshot();
        if snapshot.phase != TransferPhase::Paused {
            debug!(handle = handle.id(), phase = ?snapshot.phase, "resume ignored");
            return Ok(());
        }

        let Some((url, destination, control_rx)) = ({
            self.states.get_mut(&handle.id()).map(|mut state| {
                let (control_tx, control_rx) = watch::channel(StreamControl::Run);
                state.control = control_tx;
                (state.url.clone(), state.destination.clone(), control_rx)
            })
        }) else {
            return Ok(());
        };

        let task = begin_attempt(
            self.client.clone(),
            handle.clone(),
            url,
            destination,
            snapshot.bytes_done,
            control_rx,
            Arc::clone(&self.states),
        )
        .await?;

        if let Some(state) = self.states.get(&handle.id()) {
            *lock(&state.task) = Some(task);
        }
        Ok(())
    }

    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let Some((_, state)) = self.states.remove(&handle.id()) else {
            return Ok(());
        };
        let _ = state.control.send(StreamControl::Cancel);
        let task = lock(&state.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        // A paused transfer has no running task to acknowledge; mark it here.
        handle.update(|progress| {
            if !progress.phase.is_terminal() {
                progress.phase = TransferPhase::Cancelled;
                progress.rate_bytes_per_sec = 0.0;
            }
        });
        Ok(())
    }
}

/// Sends the (possibly ranged) request, prepares the output file and spawns
/// the stream task. Errors here surface synchronously from start/resume.
async fn begin_attempt(
    client: Client,
    handle: TransferHandle,
    url: String,
    destination: PathBuf,
    resume_from: u64,
    control: watch::Receiver<StreamControl>,
    states: Arc<DashMap<u64, HttpState>>,
) -> Result<JoinHandle<()>, TransferError> {
    handle.update(|progress| {
        progress.phase = TransferPhase::Connecting;
        progress.rate_bytes_per_sec = 0.0;
        progress.last_error = None;
    });

    let mut request = client.get(&url);
    if resume_from > 0 {
        request = request.header(RANGE, format!("bytes={resume_from}-"));
    }

    let response = request.send().await.map_err(|error| {
        if error.is_timeout() {
            TransferError::timeout(&url)
        } else {
            TransferError::network(&url, error)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(std::string::ToString::to_string);
        return Err(TransferError::http_status(&url, status.as_u16(), retry_after));
    }

    let ranged = status.as_u16() == 206;
    let degraded = resume_from > 0 && !ranged;
    let start_offset = if ranged { resume_from } else { 0 };
    // For 206 the Content-Length covers the remaining bytes only.
    let bytes_total = response.content_length().map(|len| len + start_offset);

    if degraded {
        warn!(url = %url, resume_from, "remote does not support byte ranges; restarting from zero");
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| TransferError::io(parent, error))?;
    }
    let file = if ranged {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&destination)
            .await
    } else {
        File::create(&destination).await
    }
    .map_err(|error| TransferError::io(&destination, error))?;

    handle.update(|progress| {
        progress.bytes_done = start_offset;
        progress.bytes_total = bytes_total;
        progress.degraded = progress.degraded || degraded;
        progress.phase = TransferPhase::Transferring;
    });

    Ok(tokio::spawn(stream_body(StreamJob {
        response,
        file,
        handle,
        url,
        destination,
        start_offset,
        bytes_total,
        control,
        states,
    })))
}

/// Everything one stream task needs.
struct StreamJob {
    response: Response,
    file: File,
    handle: TransferHandle,
    url: String,
    destination: PathBuf,
    start_offset: u64,
    bytes_total: Option<u64>,
    control: watch::Receiver<StreamControl>,
    states: Arc<DashMap<u64, HttpState>>,
}

/// Streams the response body to disk, honoring pause/cancel signals.
async fn stream_body(job: StreamJob) {
    let StreamJob {
        response,
        file,
        handle,
        url,
        destination,
        start_offset,
        bytes_total,
        mut control,
        states,
    } = job;

    let id = handle.id();
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_done = start_offset;
    let mut received: u64 = 0;
    let started = Instant::now();

    loop {
        tokio::select! {
            changed = control.changed() => {
                let signal = if changed.is_ok() {
                    *control.borrow_and_update()
                } else {
                    // Backend state dropped underneath us; stop cleanly.
                    StreamControl::Cancel
                };
                match signal {
                    StreamControl::Pause => {
                        if let Err(error) = writer.flush().await {
                            handle.fail(TransferError::io(&destination, error));
                            states.remove(&id);
                            return;
                        }
                        handle.update(|progress| {
                            progress.phase = TransferPhase::Paused;
                            progress.rate_bytes_per_sec = 0.0;
                        });
                        debug!(url = %url, bytes_done, "transfer paused");
                        return;
                    }
                    StreamControl::Cancel => {
                        let _ = writer.flush().await;
                        handle.update(|progress| {
                            progress.phase = TransferPhase::Cancelled;
                            progress.rate_bytes_per_sec = 0.0;
                        });
                        states.remove(&id);
                        debug!(url = %url, bytes_done, "transfer cancelled");
                        return;
                    }
                    StreamControl::Run => {}
                }
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(chunk)) => {
                        if let Err(error) = writer.write_all(&chunk).await {
                            handle.fail(TransferError::io(&destination, error));
                            states.remove(&id);
                            return;
                        }
                        bytes_done += chunk.len() as u64;
                        received += chunk.len() as u64;
                        let elapsed = started.elapsed().as_secs_f64().max(0.001);
                        #[allow(clippy::cast_precision_loss)]
                        let rate = received as f64 / elapsed;
                        handle.update(|progress| {
                            progress.bytes_done = bytes_done;
                            progress.rate_bytes_per_sec = rate;
                        });
                    }
                    Some(Err(error)) => {
                        handle.fail(TransferError::network(&url, error));
                        states.remove(&id);
                        return;
                    }
                    None => break,
                }
            }
        }
    }

    if let Err(error) = writer.flush().await {
        handle.fail(TransferError::io(&destination, error));
        states.remove(&id);
        return;
    }

    if let Some(expected) = bytes_total {
        if bytes_done != expected {
            handle.fail(TransferError::Truncated {
                url: url.clone(),
                expected,
                actual: bytes_done,
            });
            states.remove(&id);
            return;
        }
    }

    handle.update(|progress| {
        progress.phase = TransferPhase::Completed;
        progress.bytes_done = bytes_done;
        progress.rate_bytes_per_sec = 0.0;
    });
    states.remove(&id);
    info!(url = %url, bytes = bytes_done, "transfer completed");
}
