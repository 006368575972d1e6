//! Command-line argument definitions.

use std::path::PathBuf;

use clap::Parser;

/// Reconcile a console catalog against provider listings and download
/// missing titles.
#[derive(Parser, Debug)]
#[command(name = "romsync", version, about)]
pub struct Args {
    /// Console identifier to operate on (e.g. "n64").
    #[arg(long)]
    pub console: String,

    /// Directory of decoded catalog exports, one `<console>.json` each.
    #[arg(long, value_name = "DIR")]
    pub catalog_dir: PathBuf,

    /// Provider listing files (JSON: {"provider": ..., "listing": ...}).
    #[arg(value_name = "LISTING")]
    pub listings: Vec<PathBuf>,

    /// Library root downloaded artifacts land under.
    #[arg(long, default_value = "./library")]
    pub library: PathBuf,

    /// Job checkpoint database path.
    #[arg(long, default_value = "./romsync.db", value_name = "FILE")]
    pub db: PathBuf,

    /// Entry id to download after import (repeatable).
    #[arg(long = "fetch", value_name = "ENTRY_ID")]
    pub fetch: Vec<String>,

    /// Concurrent HTTP download slots.
    #[arg(long, default_value_t = 4)]
    pub http_slots: usize,

    /// Concurrent peer-to-peer download slots.
    #[arg(long, default_value_t = 2)]
    pub peer_slots: usize,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    pub quiet: bool,
}
