//! Checksum manifest regeneration
//!
//! The checksum program writes the new manifest to `<checksum_file>.new`;
//! only a complete, successful run is renamed over the previous manifest.
//! A reader of the manifest sees either the old file or the new one.

use crate::config::MountSpec;
use crate::error::{Error, Result};
use crate::tools::ChecksumRunner;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of the in-progress manifest
pub const PENDING_SUFFIX: &str = ".new";

/// Sibling path the new manifest is written to
pub fn pending_path(checksum_file: &Path) -> PathBuf {
    let mut name = OsString::from(checksum_file.as_os_str());
    name.push(PENDING_SUFFIX);
    PathBuf::from(name)
}

/// Regenerate the manifest of the tree at `root` and commit it
///
/// Returns the path of the updated manifest.
pub fn verify(
    spec: &MountSpec,
    program: &Path,
    root: &Path,
    runner: &dyn ChecksumRunner,
) -> Result<PathBuf> {
    let manifest = spec.checksum_file.as_path();
    let pending = pending_path(manifest);

    debug!("Writing new manifest to {:?}", pending);
    let output = File::create(&pending).map_err(|e| generation_failed("create", &pending, e))?;
    let handle = output
        .try_clone()
        .map_err(|e| generation_failed("reopen", &pending, e))?;

    if let Err(e) = runner.generate(program, root, manifest, output) {
        warn!("Checksum run failed, {:?} left for inspection", pending);
        return Err(Error::ChecksumGeneration(e.to_string()));
    }

    handle
        .sync_all()
        .map_err(|e| generation_failed("flush", &pending, e))?;
    drop(handle);

    std::fs::rename(&pending, manifest).map_err(|source| Error::ChecksumCommit {
        from: pending.clone(),
        to: manifest.to_path_buf(),
        source,
    })?;

    info!("Checksum file updated at {:?}", manifest);
    Ok(manifest.to_path_buf())
}

fn generation_failed(action: &str, pending: &Path, e: io::Error) -> Error {
    Error::ChecksumGeneration(format!("unable to {} {}: {}", action, pending.display(), e))
}
