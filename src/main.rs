//! CLI entry point: the composition root.
//!
//! Wires the catalog source, coverage index, transfer backends and job
//! manager into one shared [`Orchestrator`] and runs a headless
//! import/fetch pass. No peer-to-peer engine is configured here, so the
//! peer pool reports unavailable while HTTP jobs remain operable.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use romsync_core::{
    CatalogSource, ConsoleLayoutResolver, CoverageIndex, Database, EntryId, HttpBackend,
    JobConfig, JobManager, JobState, JsonCatalogSource, Orchestrator, ProviderId, RawListing,
    normalize_listing,
};

mod cli;

use cli::Args;

/// On-disk provider listing file: identifier plus raw listing.
#[derive(Debug, Deserialize)]
struct ListingFile {
    provider: String,
    listing: RawListing,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(console = %args.console, "romsync starting");

    // Canonical catalog
    let source = JsonCatalogSource::new(args.catalog_dir.clone());
    let entries = source
        .load(&args.console)
        .await
        .context("canonical catalog unavailable")?;
    let index = CoverageIndex::new(entries);

    // Job manager over the checkpoint database
    let db = Database::new(&args.db)
        .await
        .context("failed to open checkpoint database")?;
    let http_backend = Arc::new(HttpBackend::new().context("failed to build HTTP backend")?);
    let config = JobConfig {
        http_slots: args.http_slots,
        peer_slots: args.peer_slots,
        ..JobConfig::default()
    };
    // No engine wired in the headless CLI; peer jobs report unavailable.
    let jobs = JobManager::new(config, db, http_backend, None)
        .await
        .context("failed to initialize job manager")?;

    let resolver = Arc::new(ConsoleLayoutResolver::new(
        args.library.clone(),
        args.console.clone(),
    ));

    // The one shared orchestrator instance.
    let orchestrator = Arc::new(Orchestrator::new(index, jobs, resolver));

    // Import provider listings
    for path in &args.listings {
        match load_listing(path).await {
            Ok((provider, listing)) => {
                let normalized = normalize_listing(&provider, listing);
                let summary = orchestrator.import_provider(normalized);
                info!(
                    provider = %provider,
                    hash_matched = summary.hash_matched,
                    name_matched = summary.name_matched,
                    orphaned = summary.orphaned,
                    skipped = summary.skipped,
                    "provider imported"
                );
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping unreadable listing");
            }
        }
    }

    report_coverage(&orchestrator);

    if !args.fetch.is_empty() {
        fetch_entries(&orchestrator, &args.fetch).await;
    }

    Ok(())
}

/// Reads and parses one provider listing file.
async fn load_listing(path: &Path) -> Result<(ProviderId, RawListing)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file: ListingFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok((ProviderId::new(file.provider), file.listing))
}

/// Logs a per-entry coverage summary.
fn report_coverage(orchestrator: &Orchestrator) {
    orchestrator.with_index(|index| {
        let mut covered = 0usize;
        for entry in index.entries() {
            let fraction = index.coverage_fraction(&entry.id).unwrap_or(0.0);
            if fraction > 0.0 {
                covered += 1;
            }
        }
        info!(
            entries = index.entries().len(),
            covered,
            providers = index.provider_count(),
            orphans = index.orphans().len(),
            "coverage summary"
        );
    });
}

/// Enqueues the requested entries and waits for every job to settle.
async fn fetch_entries(orchestrator: &Arc<Orchestrator>, entry_ids: &[String]) {
    let mut job_ids = Vec::new();
    for raw_id in entry_ids {
        let entry_id = EntryId::new(raw_id.as_str());
        match orchestrator.enqueue(&entry_id, None).await {
            Ok(job_id) => {
                info!(entry = %entry_id, job = job_id, "download enqueued");
                job_ids.push(job_id);
            }
            Err(error) => warn!(entry = %entry_id, %error, "enqueue failed"),
        }
    }

    // Poll the shared snapshot until every requested job settles.
    loop {
        let snapshot = orchestrator.snapshot();
        let mut pending = 0usize;
        for job_id in &job_ids {
            if let Some(job) = snapshot.iter().find(|job| job.id == *job_id) {
                if !job.state.is_terminal() {
                    pending += 1;
                }
            }
        }
        if pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    for job_id in job_ids {
        if let Some(job) = orchestrator.job(job_id) {
            match job.state {
                JobState::Completed => {
                    info!(job = job_id, path = %job.destination.display(), "download completed");
                }
                JobState::Failed => {
                    let cause = job
                        .failure
                        .map(|failure| format!("{}: {}", failure.kind, failure.message))
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!(job = job_id, %cause, "download failed");
                }
                state => info!(job = job_id, %state, "download settled"),
            }
        }
    }
}
