//! Post-download integrity verification.
//!
//! When the catalog knows a strong hash for an entry, the written artifact
//! must hash to it before a job may complete. A mismatch fails the job with
//! a distinct error kind and the artifact is left on disk for inspection.

use std::path::Path;

use md5::Md5;
use md5::digest::Digest;
use sha1::Sha1;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::model::ContentHashes;
use crate::transfer::TransferError;

/// Read chunk size for hashing.
const CHUNK_SIZE: usize = 64 * 1024;

/// Verifies the artifact at `path` against the expected hashes.
///
/// MD5 is checked when the catalog carries one, then SHA-1. With no strong
/// hash known the CRC32 is compared when present; with no hashes at all the
/// check is skipped and the artifact accepted.
///
/// # Errors
///
/// Returns [`TransferError::Io`] when the artifact cannot be read and
/// [`TransferError::IntegrityMismatch`] when a digest differs.
#[instrument(skip(expected), fields(path = %path.display()))]
pub async fn verify_artifact(path: &Path, expected: &ContentHashes) -> Result<(), TransferError> {
    if !expected.has_strong() && expected.crc32.is_none() {
        debug!("no hash known; skipping integrity check");
        return Ok(());
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|error| TransferError::io(path, error))?;

    let mut md5 = expected.md5.as_ref().map(|_| Md5::new());
    let mut sha1 = expected.sha1.as_ref().map(|_| Sha1::new());
    let check_crc = !expected.has_strong() && expected.crc32.is_some();
    let mut crc = check_crc.then(crc32fast::Hasher::new);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|error| TransferError::io(path, error))?;
        if read == 0 {
            break;
        }
        if let Some(hasher) = md5.as_mut() {
            hasher.update(&buffer[..read]);
        }
        if let Some(hasher) = sha1.as_mut() {
            hasher.update(&buffer[..read]);
        }
        if let Some(hasher) = crc.as_mut() {
            hasher.update(&buffer[..read]);
        }
    }

    if let (Some(hasher), Some(expected_md5)) = (md5, expected.md5.as_ref()) {
        let actual = to_hex(&hasher.finalize());
        if &actual != expected_md5 {
            return Err(TransferError::integrity_mismatch(path, expected_md5, actual));
        }
    }
    if let (Some(hasher), Some(expected_sha1)) = (sha1, expected.sha1.as_ref()) {
        let actual = to_hex(&hasher.finalize());
        if &actual != expected_sha1 {
            return Err(TransferError::integrity_mismatch(
                path,
                expected_sha1,
                actual,
            ));
        }
    }
    if let (Some(hasher), Some(expected_crc)) = (crc, expected.crc32.as_ref()) {
        let actual = format!("{:08x}", hasher.finalize());
        if &actual != expected_crc {
            return Err(TransferError::integrity_mismatch(path, expected_crc, actual));
        }
    }

    debug!("integrity check passed");
    Ok(())
}

/// Lowercase hex encoding of a digest.
fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}
