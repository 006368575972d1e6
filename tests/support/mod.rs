//! Shared test support: a scripted transfer backend, catalog builders and
//! settle-wait helpers.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use romsync_core::model::{
    CatalogEntry, ContentHashes, EntryId, Locator, ProviderId, Region, Transport,
};
use romsync_core::provider::{ArchiveFile, RawListing, normalize_listing};
use romsync_core::transfer::{
    RetryPolicy, TransferBackend, TransferError, TransferHandle, TransferPhase,
};
use romsync_core::{
    ConsoleLayoutResolver, CoverageIndex, Database, JobConfig, JobManager, JobState, Orchestrator,
};

/// The canonical fake artifact body and its md5.
pub const FAKE_BODY: &[u8] = b"fake artifact";
pub const FAKE_BODY_MD5: &str = "2e92bdf299ae1ef62fd71883fa6f46f5";

/// One scripted behavior consumed per `start()` call.
#[derive(Debug, Clone)]
pub enum FakeStep {
    /// Write the bytes to the destination and report completion.
    Complete(Vec<u8>),
    /// Fail the start with a retryable 503.
    TransientError,
    /// Fail the start with a permanent 404.
    PermanentError,
    /// Stay in `Transferring` until paused or cancelled.
    Stall,
}

/// Timestamped record of one `start()` call.
#[derive(Debug, Clone, Copy)]
pub struct StartRecord {
    pub resume_from: u64,
    pub at: Instant,
}

/// Scripted in-memory transfer backend.
///
/// Steps are consumed in order, one per `start()`; when the script runs
/// dry every further start completes with [`FAKE_BODY`].
pub struct FakeBackend {
    kind: Transport,
    script: Mutex<VecDeque<FakeStep>>,
    starts: Mutex<Vec<StartRecord>>,
    latest: Mutex<Option<TransferHandle>>,
    ids: AtomicU64,
}

impl FakeBackend {
    pub fn new(kind: Transport, script: Vec<FakeStep>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into_iter().collect()),
            starts: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
            ids: AtomicU64::new(0),
        }
    }

    pub fn http(script: Vec<FakeStep>) -> Arc<Self> {
        Arc::new(Self::new(Transport::Http, script))
    }

    /// Returns the recorded `start()` calls.
    pub fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().unwrap().clone()
    }

    /// Completes the most recently started (stalled) transfer.
    pub fn complete_latest(&self) {
        if let Some(handle) = self.latest.lock().unwrap().clone() {
            handle.update(|p| {
                if !p.phase.is_terminal() {
                    p.phase = TransferPhase::Completed;
                }
            });
        }
    }

    fn fresh_handle(&self, kind: Transport) -> TransferHandle {
        let handle = TransferHandle::new(self.ids.fetch_add(1, Ordering::Relaxed) + 1, kind);
        *self.latest.lock().unwrap() = Some(handle.clone());
        handle
    }
}

#[async_trait]
impl TransferBackend for FakeBackend {
    fn kind(&self) -> Transport {
        self.kind
    }

    async fn start(
        &self,
        _locator: &Locator,
        destination: &Path,
        resume_from: u64,
    ) -> Result<TransferHandle, TransferError> {
        self.starts.lock().unwrap().push(StartRecord {
            resume_from,
            at: Instant::now(),
        });

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FakeStep::Complete(FAKE_BODY.to_vec()));

        match step {
            FakeStep::TransientError => Err(TransferError::http_status("http://fake/", 503, None)),
            FakeStep::PermanentError => Err(TransferError::http_status("http://fake/", 404, None)),
            FakeStep::Complete(bytes) => {
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| TransferError::io(parent, e))?;
                }
                tokio::fs::write(destination, &bytes)
                    .await
                    .map_err(|e| TransferError::io(destination, e))?;
                let handle = self.fresh_handle(self.kind);
                let total = bytes.len() as u64;
                handle.update(|p| {
                    p.bytes_done = total;
                    p.bytes_total = Some(total);
                    p.phase = TransferPhase::Completed;
                });
                Ok(handle)
            }
            FakeStep::Stall => {
                let handle = self.fresh_handle(self.kind);
                handle.update(|p| {
                    p.bytes_done = resume_from;
                    p.phase = TransferPhase::Transferring;
                });
                Ok(handle)
            }
        }
    }

    async fn pause(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        handle.update(|p| {
            if !p.phase.is_terminal() {
                p.phase = TransferPhase::Paused;
            }
        });
        Ok(())
    }

    async fn resume(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        handle.update(|p| {
            if p.phase == TransferPhase::Paused {
                p.phase = TransferPhase::Transferring;
            }
        });
        Ok(())
    }

    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        handle.update(|p| {
            if !p.phase.is_terminal() {
                p.phase = TransferPhase::Cancelled;
            }
        });
        Ok(())
    }
}

/// Catalog with the single sm64 entry used across scenarios.
pub fn sm64_catalog(md5: Option<&str>) -> Vec<CatalogEntry> {
    vec![CatalogEntry {
        id: EntryId::new("sm64-us"),
        name: "Super Mario 64".to_string(),
        region: Region::Usa,
        serial: None,
        hashes: ContentHashes::new(md5, None, None),
        size: None,
    }]
}

/// Archive-index listing with one hashed file matching the sm64 entry.
pub fn sm64_listing(provider: &str, md5: &str) -> romsync_core::provider::NormalizedListing {
    normalize_listing(
        &ProviderId::new(provider),
        RawListing::ArchiveIndex {
            base_url: Some("https://example.org/n64".to_string()),
            torrent: None,
            files: vec![ArchiveFile {
                name: "Super Mario 64 (USA).z64".to_string(),
                size: None,
                md5: Some(md5.to_string()),
                sha1: None,
                crc32: None,
            }],
        },
    )
}

/// Catalog of `count` hashed entries `entry-0` .. `entry-N`.
pub fn catalog_of(count: usize) -> Vec<CatalogEntry> {
    (0..count)
        .map(|i| CatalogEntry {
            id: EntryId::new(format!("entry-{i}")),
            name: format!("Entry {i}"),
            region: Region::Usa,
            serial: None,
            hashes: ContentHashes::new(Some(&format!("{:032x}", i + 1)), None, None),
            size: None,
        })
        .collect()
}

/// Archive-index listing offering every entry of [`catalog_of`] by hash.
pub fn listing_of(provider: &str, count: usize) -> romsync_core::provider::NormalizedListing {
    normalize_listing(
        &ProviderId::new(provider),
        RawListing::ArchiveIndex {
            base_url: Some("https://example.org/n64".to_string()),
            torrent: None,
            files: (0..count)
                .map(|i| ArchiveFile {
                    name: format!("Entry {i}.z64"),
                    size: None,
                    md5: Some(format!("{:032x}", i + 1)),
                    sha1: None,
                    crc32: None,
                })
                .collect(),
        },
    )
}

/// Torrent-bundle listing matching the sm64 entry by hash.
pub fn sm64_torrent_listing(provider: &str, md5: &str) -> romsync_core::provider::NormalizedListing {
    normalize_listing(
        &ProviderId::new(provider),
        RawListing::TorrentBundle {
            locator: "magnet:?xt=urn:btih:deadbeef".to_string(),
            files: vec![romsync_core::provider::BundleFile {
                path: "N64/Super Mario 64 (USA).z64".to_string(),
                length: None,
                md5: Some(md5.to_string()),
                sha1: None,
            }],
        },
    )
}

/// Fast-ticking manager config for tests.
pub fn fast_config() -> JobConfig {
    JobConfig {
        http_slots: 2,
        peer_slots: 1,
        retry: RetryPolicy::new(
            3,
            Duration::from_millis(80),
            Duration::from_secs(2),
            2.0,
        ),
        poll_interval: Duration::from_millis(10),
        cancel_ack_timeout: Duration::from_millis(500),
        checkpoint_interval: Duration::from_millis(50),
    }
}

/// A wired orchestrator over a temp library and in-memory checkpoint db.
pub struct TestRig {
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<FakeBackend>,
    pub dir: TempDir,
}

/// Builds an orchestrator over the given catalog with a scripted HTTP
/// backend and no peer engine.
pub async fn rig(catalog: Vec<CatalogEntry>, script: Vec<FakeStep>) -> TestRig {
    let dir = TempDir::new().expect("temp dir");
    let backend = FakeBackend::http(script);
    let db = Database::new_in_memory().await.expect("db");
    let jobs = JobManager::new(
        fast_config(),
        db,
        Arc::clone(&backend) as Arc<dyn TransferBackend>,
        None,
    )
    .await
    .expect("job manager");
    let resolver = Arc::new(ConsoleLayoutResolver::new(dir.path(), "n64"));
    let orchestrator = Arc::new(Orchestrator::new(
        CoverageIndex::new(catalog),
        jobs,
        resolver,
    ));
    TestRig {
        orchestrator,
        backend,
        dir,
    }
}

/// Polls until the job reaches `state` or the timeout expires.
pub async fn wait_for_state(
    orchestrator: &Orchestrator,
    job_id: romsync_core::JobId,
    state: JobState,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(job) = orchestrator.job(job_id) {
            if job.state == state {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "job {job_id} stuck in {:?}, wanted {state:?}",
                job.state
            );
        } else {
            assert!(Instant::now() < deadline, "job {job_id} never appeared");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls until the job is terminal, returning its final state.
pub async fn wait_until_terminal(
    orchestrator: &Orchestrator,
    job_id: romsync_core::JobId,
    timeout: Duration,
) -> JobState {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(job) = orchestrator.job(job_id) {
            if job.state.is_terminal() {
                return job.state;
            }
        }
        assert!(
            Instant::now() < deadline,
            "job {job_id} did not settle in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
