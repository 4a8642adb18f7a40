//! Pre-flight validation
//!
//! Everything here is read-only. A [`Target`] can only be obtained
//! through [`validate`], and staging accepts nothing else, so no
//! directory or mount is touched for a configuration that cannot be used.

use crate::config::{Config, MountSpec};
use crate::error::{Error, Result};
use crate::mount::{OVERLAY_MOUNT_DIR, REMOTE_MOUNT_DIR};
use nix::unistd::{Gid, Group};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

/// Any of the execute bits
const EXECUTE_BITS: u32 = 0o111;

/// A validated mount target
#[derive(Debug, Clone)]
pub struct Target<'a> {
    /// Remote host
    pub host: &'a str,
    /// Selected mount spec
    pub spec: &'a MountSpec,
    /// Mount the remote tree read-write
    pub read_write: bool,
    /// Checksum program, present when checksumming was requested
    pub checksum_program: Option<&'a Path>,
    /// Explicit gid from the configured group
    pub gid: Option<u32>,
}

impl Target<'_> {
    pub fn perform_checksum(&self) -> bool {
        self.checksum_program.is_some()
    }
}

/// Check `config` and resolve the selected mount target
pub fn validate(config: &Config) -> Result<Target<'_>> {
    if config.host.trim().is_empty() {
        return Err(Error::IncompleteConfig("host is not set".to_string()));
    }

    let spec = select(config)?;
    check_spec(spec, config.perform_checksum)?;

    let checksum_program = if config.perform_checksum {
        check_checksum_preconditions(&spec.checksum_file, &config.checksum_tree_program)?;
        Some(config.checksum_tree_program.as_path())
    } else {
        None
    };

    let gid = match config.group.as_deref() {
        Some(name) if !name.is_empty() => Some(resolve_group(name)?.as_raw()),
        _ => None,
    };

    debug!("Validated mount target '{}'", spec.name);

    Ok(Target {
        host: config.host.trim(),
        spec,
        read_write: config.mount_read_write,
        checksum_program,
        gid,
    })
}

/// Find the single mount spec named by the selector
fn select(config: &Config) -> Result<&MountSpec> {
    let name = match config.selected.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => return Err(Error::Selection("no mount target selected".to_string())),
    };

    let mut matches = config.mounts.iter().filter(|m| m.name == name);
    let spec = matches.next().ok_or_else(|| {
        let known: Vec<&str> = config.mounts.iter().map(|m| m.name.as_str()).collect();
        Error::Selection(format!(
            "unknown mount target '{}' (known: {})",
            name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        ))
    })?;

    if matches.next().is_some() {
        return Err(Error::Selection(format!(
            "mount target '{}' is defined more than once",
            name
        )));
    }

    Ok(spec)
}

fn check_spec(spec: &MountSpec, perform_checksum: bool) -> Result<()> {
    let mut missing = Vec::new();
    if spec.name.trim().is_empty() {
        missing.push("name");
    }
    if spec.remote_dir.trim().is_empty() {
        missing.push("remote_dir");
    }
    if is_empty(&spec.encfs_config) {
        missing.push("encfs_config");
    }
    if perform_checksum && is_empty(&spec.checksum_file) {
        missing.push("checksum_file");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::IncompleteConfig(format!(
            "mount target '{}' is missing {}",
            spec.name,
            missing.join(", ")
        )))
    }
}

fn check_checksum_preconditions(checksum_file: &Path, program: &Path) -> Result<()> {
    if is_empty(program) {
        return Err(Error::IncompleteConfig(
            "checksum_tree_program is not set".to_string(),
        ));
    }

    let info = std::fs::metadata(checksum_file).map_err(|e| {
        Error::ChecksumPrecondition(format!(
            "unable to access checksum file {}: {}",
            checksum_file.display(),
            e
        ))
    })?;
    if !info.is_file() {
        return Err(Error::ChecksumPrecondition(format!(
            "checksum file {} is not a regular file",
            checksum_file.display()
        )));
    }

    let info = std::fs::metadata(program).map_err(|e| {
        Error::ChecksumPrecondition(format!(
            "unable to access checksum tree program {}: {}",
            program.display(),
            e
        ))
    })?;
    if !info.is_file() {
        return Err(Error::ChecksumPrecondition(format!(
            "checksum tree program {} is not a regular file",
            program.display()
        )));
    }
    if info.permissions().mode() & EXECUTE_BITS == 0 {
        return Err(Error::ChecksumPrecondition(format!(
            "checksum tree program {} is not executable",
            program.display()
        )));
    }

    Ok(())
}

fn resolve_group(name: &str) -> Result<Gid> {
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(Error::InvalidConfig(format!("unknown group '{}'", name))),
        Err(e) => Err(Error::InvalidConfig(format!(
            "failed to look up group '{}': {}",
            name, e
        ))),
    }
}

fn is_empty(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Paths the selected target will use, for display
pub fn plan(config: &Config, target: &Target<'_>) -> Vec<(&'static str, String)> {
    let workspace = &config.workspace;
    let mut lines = vec![
        ("source", format!("{}:{}", target.host, target.spec.remote_dir)),
        ("remote mount", workspace.join(REMOTE_MOUNT_DIR).display().to_string()),
        ("decrypted mount", workspace.join(OVERLAY_MOUNT_DIR).display().to_string()),
        ("encfs config", target.spec.encfs_config.display().to_string()),
        (
            "mode",
            if target.read_write { "read-write" } else { "read-only" }.to_string(),
        ),
    ];
    if target.perform_checksum() {
        lines.push(("checksum file", target.spec.checksum_file.display().to_string()));
    }
    lines
}
