//! SQLite-backed job checkpoint store.
//!
//! The store round-trips job identity, state and byte offset exactly, so a
//! restart can offer to resume interrupted jobs instead of losing queue
//! state. It is written after every terminal transition and periodically
//! while jobs are active.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{instrument, warn};

use crate::db::Database;
use crate::model::{ContentHashes, EntryId, Locator, ProviderId, Transport};
use crate::transfer::FailureKind;

use super::error::JobError;
use super::item::{DownloadJob, JobFailure, JobId, JobState};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Persistent checkpoint store for the job table.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new job, returning its assigned id and enqueue timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the insert fails.
    #[instrument(skip(self, job), fields(entry = %job.entry_id, provider = %job.provider))]
    pub async fn insert(&self, job: &DownloadJob) -> Result<(JobId, String)> {
        let locator_json =
            serde_json::to_string(&job.locator).unwrap_or_else(|_| String::from("{}"));
        let row = sqlx::query(
            r"INSERT INTO jobs (
                entry_id, provider, locator, transport, destination,
                state, bytes_done, bytes_total,
                expected_md5, expected_sha1, expected_crc32, retry_count
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id, created_at",
        )
        .bind(job.entry_id.as_str())
        .bind(job.provider.as_str())
        .bind(locator_json)
        .bind(job.transport.as_str())
        .bind(job.destination.display().to_string())
        .bind(job.state.as_str())
        .bind(i64::try_from(job.bytes_done).unwrap_or(i64::MAX))
        .bind(job.bytes_total.map(|b| i64::try_from(b).unwrap_or(i64::MAX)))
        .bind(job.expected_hashes.md5.as_deref())
        .bind(job.expected_hashes.sha1.as_deref())
        .bind(job.expected_hashes.crc32.as_deref())
        .bind(i64::from(job.retry_count))
        .fetch_one(self.db.pool())
        .await?;

        Ok((row.get("id"), row.get("created_at")))
    }

    /// Checkpoints transfer progress for an active job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the update fails.
    #[instrument(skip(self))]
    pub async fn checkpoint_progress(
        &self,
        id: JobId,
        bytes_done: u64,
        bytes_total: Option<u64>,
    ) -> Result<()> {
        sqlx::query(
            r"UPDATE jobs
              SET bytes_done = ?, bytes_total = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(i64::try_from(bytes_done).unwrap_or(i64::MAX))
        .bind(bytes_total.map(|b| i64::try_from(b).unwrap_or(i64::MAX)))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Records a state transition together with retry count and failure.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the update fails.
    #[instrument(skip(self, failure), fields(state = %state))]
    pub async fn record_state(
        &self,
        id: JobId,
        state: JobState,
        retry_count: u32,
        failure: Option<&JobFailure>,
    ) -> Result<()> {
        sqlx::query(
            r"UPDATE jobs
              SET state = ?,
                  retry_count = ?,
                  error_kind = ?,
                  error_message = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(i64::from(retry_count))
        .bind(failure.map(|f| f.kind.as_str()))
        .bind(failure.map(|f| f.message.as_str()))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Loads all checkpointed jobs, ordered by enqueue time (id).
    ///
    /// Rows that fail to decode (hand-edited database, future schema) are
    /// logged and skipped rather than poisoning recovery.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the query fails.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query(r"SELECT * FROM jobs ORDER BY id ASC")
            .fetch_all(self.db.pool())
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_row(&row) {
                Ok(job) => jobs.push(job),
                Err(reason) => {
                    warn!(%reason, "skipping undecodable job row");
                }
            }
        }
        Ok(jobs)
    }

    /// Marks jobs left `queued`/`active` by a previous run as `paused`.
    ///
    /// Called once at startup so interrupted jobs can be offered for
    /// resume. Returns the number of jobs recovered.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the update fails.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = ?, updated_at = datetime('now')
              WHERE state IN (?, ?)",
        )
        .bind(JobState::Paused.as_str())
        .bind(JobState::Queued.as_str())
        .bind(JobState::Active.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes all terminal jobs, returning how many were purged.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn purge_terminal(&self) -> Result<u64> {
        let result = sqlx::query(r"DELETE FROM jobs WHERE state IN (?, ?, ?)")
            .bind(JobState::Completed.as_str())
            .bind(JobState::Failed.as_str())
            .bind(JobState::Cancelled.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

/// Decodes one row into a job, reporting the first malformed column.
fn decode_row(row: &SqliteRow) -> std::result::Result<DownloadJob, String> {
    let id: i64 = row.get("id");
    let locator_json: String = row.get("locator");
    let locator: Locator = serde_json::from_str(&locator_json)
        .map_err(|e| format!("job {id}: bad locator json: {e}"))?;
    let transport: Transport = row
        .get::<String, _>("transport")
        .parse()
        .map_err(|e| format!("job {id}: {e}"))?;
    let state: JobState = row
        .get::<String, _>("state")
        .parse()
        .map_err(|e| format!("job {id}: {e}"))?;

    let failure = match (
        row.get::<Option<String>, _>("error_kind"),
        row.get::<Option<String>, _>("error_message"),
    ) {
        (Some(kind), message) => {
            let kind: FailureKind = kind.parse().map_err(|e| format!("job {id}: {e}"))?;
            Some(JobFailure::new(kind, message.unwrap_or_default()))
        }
        (None, _) => None,
    };

    let bytes_done: i64 = row.get("bytes_done");
    let bytes_total: Option<i64> = row.get("bytes_total");
    let retry_count: i64 = row.get("retry_count");
    let expected_hashes = ContentHashes::new(
        row.get::<Option<String>, _>("expected_md5").as_deref(),
        row.get::<Option<String>, _>("expected_sha1").as_deref(),
        row.get::<Option<String>, _>("expected_crc32").as_deref(),
    );

    Ok(DownloadJob {
        id,
        entry_id: EntryId::new(row.get::<String, _>("entry_id")),
        provider: ProviderId::new(row.get::<String, _>("provider")),
        locator,
        transport,
        destination: row.get::<String, _>("destination").into(),
        state,
        bytes_done: u64::try_from(bytes_done).unwrap_or(0),
        bytes_total: bytes_total.and_then(|b| u64::try_from(b).ok()),
        expected_hashes,
        rate_bytes_per_sec: 0.0,
        degraded: false,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        failure,
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn sample_job() -> DownloadJob {
        DownloadJob {
            id: 0,
            entry_id: EntryId::new("sm64-us"),
            provider: ProviderId::new("myrient"),
            locator: Locator::http("https://example.org/sm64.z64").unwrap(),
            transport: Transport::Http,
            destination: PathBuf::from("/tmp/sm64.z64"),
            state: JobState::Queued,
            bytes_done: 0,
            bytes_total: Some(8_388_608),
            expected_hashes: ContentHashes::new(Some("abc123"), None, None),
            rate_bytes_per_sec: 0.0,
            degraded: false,
            retry_count: 0,
            failure: None,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_roundtrip() {
        let db = Database::new_in_memory().await.unwrap();
        let store = JobStore::new(db);

        let (id, created_at) = store.insert(&sample_job()).await.unwrap();
        assert!(id > 0);
        assert!(!created_at.is_empty());

        let jobs = store.load_all().await.unwrap();
        assert_eq!(jobs.len(), 1);
        let loaded = &jobs[0];
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.entry_id, EntryId::new("sm64-us"));
        assert_eq!(loaded.transport, Transport::Http);
        assert_eq!(loaded.state, JobState::Queued);
        assert_eq!(loaded.bytes_total, Some(8_388_608));
        assert_eq!(loaded.expected_hashes.md5.as_deref(), Some("abc123"));
        assert_eq!(loaded.created_at, created_at);
        assert_eq!(
            loaded.locator,
            Locator::http("https://example.org/sm64.z64").unwrap()
        );
    }

    #[tokio::test]
    async fn test_checkpoint_progress_roundtrips_byte_offset() {
        let db = Database::new_in_memory().await.unwrap();
        let store = JobStore::new(db);
        let (id, _) = store.insert(&sample_job()).await.unwrap();

        store
            .checkpoint_progress(id, 3_355_443, Some(8_388_608))
            .await
            .unwrap();

        let jobs = store.load_all().await.unwrap();
        assert_eq!(jobs[0].bytes_done, 3_355_443);
    }

    #[tokio::test]
    async fn test_record_state_retains_failure() {
        let db = Database::new_in_memory().await.unwrap();
        let store = JobStore::new(db);
        let (id, _) = store.insert(&sample_job()).await.unwrap();

        let failure = JobFailure::new(FailureKind::IntegrityMismatch, "hash mismatch");
        store
            .record_state(id, JobState::Failed, 2, Some(&failure))
            .await
            .unwrap();

        let jobs = store.load_all().await.unwrap();
        assert_eq!(jobs[0].state, JobState::Failed);
        assert_eq!(jobs[0].retry_count, 2);
        let loaded_failure = jobs[0].failure.as_ref().unwrap();
        assert_eq!(loaded_failure.kind, FailureKind::IntegrityMismatch);
        assert_eq!(loaded_failure.message, "hash mismatch");
    }

    #[tokio::test]
    async fn test_recover_interrupted_marks_paused() {
        let db = Database::new_in_memory().await.unwrap();
        let store = JobStore::new(db);

        let (queued, _) = store.insert(&sample_job()).await.unwrap();
        let mut active_job = sample_job();
        active_job.state = JobState::Active;
        let (active, _) = store.insert(&active_job).await.unwrap();
        let mut done_job = sample_job();
        done_job.state = JobState::Completed;
        let (done, _) = store.insert(&done_job).await.unwrap();

        let recovered = store.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 2);

        let jobs = store.load_all().await.unwrap();
        let by_id = |id: JobId| jobs.iter().find(|j| j.id == id).unwrap();
        assert_eq!(by_id(queued).state, JobState::Paused);
        assert_eq!(by_id(active).state, JobState::Paused);
        assert_eq!(by_id(done).state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_purge_terminal_removes_only_terminal() {
        let db = Database::new_in_memory().await.unwrap();
        let store = JobStore::new(db);

        let (queued, _) = store.insert(&sample_job()).await.unwrap();
        let (failed, _) = store.insert(&sample_job()).await.unwrap();
        store
            .record_state(failed, JobState::Failed, 3, None)
            .await
            .unwrap();

        let purged = store.purge_terminal().await.unwrap();
        assert_eq!(purged, 1);

        let jobs = store.load_all().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, queued);
    }
}
