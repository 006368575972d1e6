//! Provider listing normalization.
//!
//! Providers describe their inventories in two native shapes: archive-index
//! style file lists (one record per downloadable file, hashes included when
//! the provider computes them) and torrent-bundle metadata (per-file paths
//! and lengths inside one bundle). Both are modeled as tagged variants of
//! [`RawListing`] feeding a single normalization contract that emits
//! [`ProviderRecord`]s.
//!
//! Records lacking both a usable strong hash and a usable normalized name
//! are skipped - logged and counted, never an error. Raw records that
//! normalize to the same (name, region) but carry different hashes are kept
//! as distinct records: they may be distinct revisions.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::model::{ContentHashes, Locator, ProviderId, ProviderRecord};

/// One file entry in an archive-index style listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveFile {
    /// File name as listed by the provider.
    pub name: String,
    /// Byte size when listed.
    #[serde(default)]
    pub size: Option<u64>,
    /// MD5 digest when listed.
    #[serde(default)]
    pub md5: Option<String>,
    /// SHA-1 digest when listed.
    #[serde(default)]
    pub sha1: Option<String>,
    /// CRC32 checksum when listed.
    #[serde(default)]
    pub crc32: Option<String>,
}

/// One file entry inside a torrent bundle's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFile {
    /// Path of the file inside the bundle.
    pub path: String,
    /// File length in bytes when present in the metadata.
    #[serde(default)]
    pub length: Option<u64>,
    /// Per-file MD5 digest when the bundle metadata carries one.
    #[serde(default)]
    pub md5: Option<String>,
    /// Per-file SHA-1 digest when the bundle metadata carries one.
    #[serde(default)]
    pub sha1: Option<String>,
}

/// A provider's raw listing, already parsed from its native format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawListing {
    /// Archive-index style file list.
    ArchiveIndex {
        /// Base URL that file names are joined onto to form HTTP locators.
        #[serde(default)]
        base_url: Option<String>,
        /// Bundle-wide torrent locator offered alongside direct downloads.
        #[serde(default)]
        torrent: Option<String>,
        /// The listed files.
        files: Vec<ArchiveFile>,
    },
    /// Torrent-bundle metadata.
    TorrentBundle {
        /// Locator of the bundle itself.
        locator: String,
        /// Files inside the bundle.
        files: Vec<BundleFile>,
    },
}

/// Result of normalizing one provider listing.
#[derive(Debug, Clone)]
pub struct NormalizedListing {
    /// The provider this listing belongs to.
    pub provider: ProviderId,
    /// Usable records.
    pub records: Vec<ProviderRecord>,
    /// Raw records dropped for lacking both a hash and a usable name.
    pub skipped: usize,
}

/// Normalizes one provider's raw listing into provider records.
///
/// Locators are validated for well-formedness only; an invalid locator is
/// logged and dropped from the record, but the record itself survives as
/// long as it is matchable (a record with zero locators still contributes
/// to coverage, it just cannot be downloaded from).
#[must_use]
#[instrument(skip(listing), fields(provider = %provider))]
pub fn normalize_listing(provider: &ProviderId, listing: RawListing) -> NormalizedListing {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    match listing {
        RawListing::ArchiveIndex {
            base_url,
            torrent,
            files,
        } => {
            for file in files {
                let hashes = ContentHashes::new(
                    file.md5.as_deref(),
                    file.sha1.as_deref(),
                    file.crc32.as_deref(),
                );
                let mut locators = Vec::new();
                if let Some(base) = &base_url {
                    match archive_http_locator(base, &file.name) {
                        Ok(locator) => locators.push(locator),
                        Err(error) => {
                            warn!(provider = %provider, file = %file.name, %error,
                                "dropping malformed HTTP locator");
                        }
                    }
                }
                if let Some(torrent) = &torrent {
                    match Locator::peer(torrent.clone(), Some(file.name.clone())) {
                        Ok(locator) => locators.push(locator),
                        Err(error) => {
                            warn!(provider = %provider, file = %file.name, %error,
                                "dropping malformed torrent locator");
                        }
                    }
                }
                push_record(
                    &mut records,
                    &mut skipped,
                    provider,
                    file.name,
                    locators,
                    hashes,
                    file.size,
                );
            }
        }
        RawListing::TorrentBundle { locator, files } => {
            for file in files {
                let hashes = ContentHashes::new(file.md5.as_deref(), file.sha1.as_deref(), None);
                let name = bundle_file_name(&file.path);
                let mut locators = Vec::new();
                match Locator::peer(locator.clone(), Some(file.path.clone())) {
                    Ok(built) => locators.push(built),
                    Err(error) => {
                        warn!(provider = %provider, file = %file.path, %error,
                            "dropping malformed bundle locator");
                    }
                }
                push_record(
                    &mut records,
                    &mut skipped,
                    provider,
                    name,
                    locators,
                    hashes,
                    file.length,
                );
            }
        }
    }

    debug!(
        provider = %provider,
        records = records.len(),
        skipped,
        "normalized provider listing"
    );

    NormalizedListing {
        provider: provider.clone(),
        records,
        skipped,
    }
}

/// Appends a record unless it is unmatchable (no strong hash AND no name key).
fn push_record(
    records: &mut Vec<ProviderRecord>,
    skipped: &mut usize,
    provider: &ProviderId,
    name: String,
    locators: Vec<Locator>,
    hashes: ContentHashes,
    size: Option<u64>,
) {
    let record = ProviderRecord {
        provider: provider.clone(),
        name,
        locators,
        hashes,
        size,
    };

    if !record.hashes.has_strong() && record.name_key().is_none() {
        warn!(provider = %provider, name = %record.name, "skipping unmatchable record");
        *skipped += 1;
        return;
    }

    records.push(record);
}

/// Joins a listing base URL with a percent-encoded file name.
fn archive_http_locator(base_url: &str, file_name: &str) -> Result<Locator, crate::model::LocatorError> {
    let encoded = urlencoding::encode(file_name);
    let url = format!("{}/{}", base_url.trim_end_matches('/'), encoded);
    Locator::http(url)
}

/// Returns the file name component of a bundle path.
fn bundle_file_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}
