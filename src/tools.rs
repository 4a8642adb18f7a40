//! External programs the staging pipeline drives
//!
//! Each external collaborator sits behind a small trait so the pipeline
//! can be exercised without touching real mount infrastructure.
//! [`SystemTools`] is the process-backed implementation used by the
//! binary.

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::session::{default_interrupts_in_child, SessionStatus};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Parameters of a remote mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMount<'a> {
    /// Remote host
    pub host: &'a str,
    /// Directory on the remote host
    pub remote_dir: &'a str,
    /// Local mount point
    pub mount_point: &'a Path,
    /// Mount read-only
    pub read_only: bool,
    /// Owner presented for the mounted tree
    pub uid: u32,
    /// Group presented for the mounted tree
    pub gid: u32,
}

impl RemoteMount<'_> {
    /// `host:remote_dir`
    pub fn source(&self) -> String {
        format!("{}:{}", self.host, self.remote_dir)
    }
}

/// Mounts a remote directory tree locally
pub trait RemoteMounter {
    fn mount_remote(&self, request: &RemoteMount<'_>) -> Result<()>;
}

/// Mounts a decrypted view of an encrypted directory
pub trait OverlayMounter {
    fn mount_overlay(&self, encrypted_dir: &Path, mount_point: &Path, config_path: &Path) -> Result<()>;
}

/// Releases a mount
pub trait Unmounter {
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// Runs the checksum-tree program
pub trait ChecksumRunner {
    /// Run `program . manifest` inside `root`, writing stdout to `output`
    fn generate(&self, program: &Path, root: &Path, manifest: &Path, output: File) -> Result<()>;
}

/// Runs the interactive session
pub trait ShellRunner {
    fn run_shell(&self, cwd: &Path) -> Result<SessionStatus>;
}

/// The set of collaborators a run uses
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub remote: &'a dyn RemoteMounter,
    pub overlay: &'a dyn OverlayMounter,
    pub unmounter: &'a dyn Unmounter,
    pub checksum: &'a dyn ChecksumRunner,
    pub shell: &'a dyn ShellRunner,
}

impl<'a> Tools<'a> {
    /// Use one value for every capability
    pub fn from_all<T>(tools: &'a T) -> Self
    where
        T: RemoteMounter + OverlayMounter + Unmounter + ChecksumRunner + ShellRunner,
    {
        Tools {
            remote: tools,
            overlay: tools,
            unmounter: tools,
            checksum: tools,
            shell: tools,
        }
    }
}

/// Process-backed tools configured from [`ToolsConfig`]
#[derive(Debug, Clone)]
pub struct SystemTools {
    config: ToolsConfig,
}

impl SystemTools {
    pub fn new(config: ToolsConfig) -> Self {
        SystemTools { config }
    }
}

impl RemoteMounter for SystemTools {
    fn mount_remote(&self, request: &RemoteMount<'_>) -> Result<()> {
        info!(
            "Mounting {} at {:?} ({})",
            request.source(),
            request.mount_point,
            if request.read_only { "read-only" } else { "read-write" }
        );
        let mut cmd = Command::new(&self.config.remote_mount);
        cmd.args(remote_mount_args(request));
        run(&mut cmd)
    }
}

impl OverlayMounter for SystemTools {
    fn mount_overlay(&self, encrypted_dir: &Path, mount_point: &Path, config_path: &Path) -> Result<()> {
        info!("Mounting decrypted view of {:?} at {:?}", encrypted_dir, mount_point);
        let mut cmd = Command::new(&self.config.overlay_mount);
        cmd.arg(encrypted_dir)
            .arg(mount_point)
            .env(&self.config.overlay_config_env, config_path);
        run(&mut cmd)
    }
}

impl Unmounter for SystemTools {
    fn unmount(&self, mount_point: &Path) -> Result<()> {
        info!("Unmounting {:?}", mount_point);
        let mut cmd = Command::new(&self.config.unmount);
        cmd.args(&self.config.unmount_args).arg(mount_point);
        run(&mut cmd)
    }
}

impl ChecksumRunner for SystemTools {
    fn generate(&self, program: &Path, root: &Path, manifest: &Path, output: File) -> Result<()> {
        info!("Computing checksums under {:?}", root);
        let mut cmd = Command::new(program);
        cmd.arg(".")
            .arg(manifest)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::inherit());
        run(&mut cmd)
    }
}

impl ShellRunner for SystemTools {
    fn run_shell(&self, cwd: &Path) -> Result<SessionStatus> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.current_dir(cwd);
        default_interrupts_in_child(&mut cmd);

        debug!("Spawning {}", render(&cmd));
        let status = cmd.status().map_err(|e| command_failed(&cmd, e.to_string()))?;

        Ok(SessionStatus::from(status))
    }
}

/// Arguments for the remote mount program
pub fn remote_mount_args(request: &RemoteMount<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![request.source().into(), request.mount_point.into()];
    if request.read_only {
        args.push("-o".into());
        args.push("ro".into());
    }
    args.push("-o".into());
    args.push(format!("uid={}", request.uid).into());
    args.push("-o".into());
    args.push(format!("gid={}", request.gid).into());
    args
}

/// Run a command to completion with inherited standard streams
fn run(cmd: &mut Command) -> Result<()> {
    default_interrupts_in_child(cmd);
    debug!("Running {}", render(cmd));
    let status = cmd
        .status()
        .map_err(|e| command_failed(cmd, e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(command_failed(cmd, status.to_string()))
    }
}

fn command_failed(cmd: &Command, reason: String) -> Error {
    Error::CommandFailed {
        command: render(cmd),
        reason,
    }
}

/// Full command line of `cmd`, quoted
pub fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        s.into_owned()
    } else {
        format!("{:?}", s)
    }
}
