//! Configuration management for makeavail

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default name of the workspace directory under the system temp dir
pub const DEFAULT_WORKSPACE_NAME: &str = "makeavailmnt";

/// Environment variable encfs reads its config location from
pub const DEFAULT_OVERLAY_CONFIG_ENV: &str = "ENCFS6_CONFIG";

/// Shell used when `$SHELL` is not set
pub const FALLBACK_SHELL: &str = "/bin/bash";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote host holding the encrypted trees
    pub host: String,

    /// Known mount targets
    pub mounts: Vec<MountSpec>,

    /// Name of the mount target to open (set per invocation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,

    /// Program that writes a checksum manifest of a tree to stdout
    pub checksum_tree_program: PathBuf,

    /// Mount the remote tree read-write instead of read-only
    pub mount_read_write: bool,

    /// Regenerate the checksum manifest after the session
    pub perform_checksum: bool,

    /// Group whose members get access to the mounted data when run as root
    pub group: Option<String>,

    /// Process-private directory holding both mount points
    pub workspace: PathBuf,

    /// External programs
    pub tools: ToolsConfig,
}

/// One remote encrypted tree
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MountSpec {
    /// Unique selector
    pub name: String,

    /// Path to the encrypted tree on the remote host
    pub remote_dir: String,

    /// Path to the encfs config on the local filesystem
    pub encfs_config: PathBuf,

    /// Path to the previously recorded checksum manifest
    pub checksum_file: PathBuf,
}

/// External program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Remote mount program (sshfs)
    pub remote_mount: PathBuf,

    /// Encrypting overlay program (encfs)
    pub overlay_mount: PathBuf,

    /// Environment variable that carries the overlay config path
    pub overlay_config_env: String,

    /// Mount release program, invoked as `<program> <unmount_args...> <mount point>`
    pub unmount: PathBuf,

    /// Arguments placed before the mount point when releasing a mount
    pub unmount_args: Vec<String>,

    /// Interactive shell
    pub shell: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::new(),
            mounts: Vec::new(),
            selected: None,
            checksum_tree_program: PathBuf::new(),
            mount_read_write: false,
            perform_checksum: false,
            group: None,
            workspace: std::env::temp_dir().join(DEFAULT_WORKSPACE_NAME),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let shell = std::env::var_os("SHELL")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL));

        ToolsConfig {
            remote_mount: PathBuf::from("sshfs"),
            overlay_mount: PathBuf::from("encfs"),
            overlay_config_env: DEFAULT_OVERLAY_CONFIG_ENV.to_string(),
            // macOS umount has no -u
            #[cfg(target_os = "macos")]
            unmount: PathBuf::from("umount"),
            #[cfg(target_os = "macos")]
            unmount_args: Vec::new(),
            #[cfg(not(target_os = "macos"))]
            unmount: PathBuf::from("fusermount"),
            #[cfg(not(target_os = "macos"))]
            unmount_args: vec!["-u".to_string()],
            shell,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MAKEAVAIL_HOST") {
            let host = host.trim().to_string();
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(workspace) = std::env::var("MAKEAVAIL_WORKSPACE") {
            let workspace = workspace.trim();
            if !workspace.is_empty() {
                self.workspace = PathBuf::from(workspace);
            }
        }

        if let Some(flag) = env_flag("MAKEAVAIL_CHECKSUM") {
            self.perform_checksum = flag;
        }

        if let Some(flag) = env_flag("MAKEAVAIL_READ_WRITE") {
            self.mount_read_write = flag;
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Select a mount target by name
    pub fn select(&mut self, name: impl Into<String>) {
        self.selected = Some(name.into());
    }

    /// Select the only configured target when there is exactly one
    pub fn select_sole_target(&mut self) -> bool {
        if self.selected.is_none() && self.mounts.len() == 1 {
            self.selected = Some(self.mounts[0].name.clone());
            return true;
        }
        false
    }

    /// A starter configuration for `init`
    pub fn example(host: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            mounts: vec![MountSpec {
                name: "archive".to_string(),
                remote_dir: "/srv/encrypted/archive".to_string(),
                encfs_config: PathBuf::from("/path/to/archive.encfs6.xml"),
                checksum_file: PathBuf::from("/path/to/archive.sha256"),
            }],
            ..Config::default()
        }
    }
}

/// Parse a boolean environment variable, ignoring unrecognised values
fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    parse_flag(&value)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
