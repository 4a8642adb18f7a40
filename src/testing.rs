//! Test doubles for the external tools

use crate::error::{Error, Result};
use crate::session::SessionStatus;
use crate::tools::{
    ChecksumRunner, OverlayMounter, RemoteMount, RemoteMounter, ShellRunner, Tools, Unmounter,
};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What the fake checksum program does
#[derive(Debug, Clone)]
pub enum ChecksumBehavior {
    /// Write these bytes and succeed
    Succeed(Vec<u8>),
    /// Write these bytes, then exit non-zero
    Fail(Vec<u8>),
}

/// Journaling stand-in for every external program
///
/// Mounts are recorded, not performed; directories are real.
pub struct FakeTools {
    journal: RefCell<Vec<String>>,
    fail_remote: Cell<bool>,
    remote_side_effect: RefCell<Option<PathBuf>>,
    fail_overlay: Cell<bool>,
    fail_unmount: RefCell<Vec<PathBuf>>,
    checksum: RefCell<ChecksumBehavior>,
    shell_status: Cell<SessionStatus>,
    shell_panics: Cell<bool>,
}

impl FakeTools {
    pub fn new() -> Self {
        FakeTools {
            journal: RefCell::new(Vec::new()),
            fail_remote: Cell::new(false),
            remote_side_effect: RefCell::new(None),
            fail_overlay: Cell::new(false),
            fail_unmount: RefCell::new(Vec::new()),
            checksum: RefCell::new(ChecksumBehavior::Succeed(b"fresh\n".to_vec())),
            shell_status: Cell::new(SessionStatus::Exited(0)),
            shell_panics: Cell::new(false),
        }
    }

    pub fn tools(&self) -> Tools<'_> {
        Tools::from_all(self)
    }

    /// Every recorded invocation, in order
    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    pub fn fail_remote_mount(&self) {
        self.fail_remote.set(true);
    }

    /// Have the remote mount create a directory at `path` as it succeeds
    pub fn remote_mount_creates(&self, path: impl Into<PathBuf>) {
        *self.remote_side_effect.borrow_mut() = Some(path.into());
    }

    pub fn fail_overlay_mount(&self) {
        self.fail_overlay.set(true);
    }

    pub fn fail_unmount_of(&self, mount_point: impl Into<PathBuf>) {
        self.fail_unmount.borrow_mut().push(mount_point.into());
    }

    pub fn checksum_behavior(&self, behavior: ChecksumBehavior) {
        *self.checksum.borrow_mut() = behavior;
    }

    pub fn shell_exits_with(&self, status: SessionStatus) {
        self.shell_status.set(status);
    }

    pub fn panic_in_shell(&self) {
        self.shell_panics.set(true);
    }

    fn record(&self, entry: String) {
        self.journal.borrow_mut().push(entry);
    }

    fn refuse(what: &str) -> Error {
        Error::CommandFailed {
            command: what.to_string(),
            reason: "exit status: 1".to_string(),
        }
    }
}

impl RemoteMounter for FakeTools {
    fn mount_remote(&self, request: &RemoteMount<'_>) -> Result<()> {
        self.record(format!(
            "remote {} {}{} uid={} gid={}",
            request.source(),
            request.mount_point.display(),
            if request.read_only { " ro" } else { "" },
            request.uid,
            request.gid
        ));
        if self.fail_remote.get() {
            return Err(Self::refuse("sshfs"));
        }
        if let Some(path) = self.remote_side_effect.borrow().as_ref() {
            std::fs::create_dir(path)?;
        }
        Ok(())
    }
}

impl OverlayMounter for FakeTools {
    fn mount_overlay(&self, encrypted_dir: &Path, mount_point: &Path, config_path: &Path) -> Result<()> {
        self.record(format!(
            "overlay {} {} {}",
            encrypted_dir.display(),
            mount_point.display(),
            config_path.display()
        ));
        if self.fail_overlay.get() {
            return Err(Self::refuse("encfs"));
        }
        Ok(())
    }
}

impl Unmounter for FakeTools {
    fn unmount(&self, mount_point: &Path) -> Result<()> {
        self.record(format!("unmount {}", mount_point.display()));
        if self.fail_unmount.borrow().iter().any(|p| p == mount_point) {
            return Err(Self::refuse("fusermount -u"));
        }
        Ok(())
    }
}

impl ChecksumRunner for FakeTools {
    fn generate(&self, program: &Path, root: &Path, manifest: &Path, mut output: File) -> Result<()> {
        self.record(format!(
            "checksum {} {} {}",
            program.display(),
            root.display(),
            manifest.display()
        ));
        match &*self.checksum.borrow() {
            ChecksumBehavior::Succeed(bytes) => {
                output.write_all(bytes)?;
                Ok(())
            }
            ChecksumBehavior::Fail(bytes) => {
                output.write_all(bytes)?;
                Err(Self::refuse("sumtree"))
            }
        }
    }
}

impl ShellRunner for FakeTools {
    fn run_shell(&self, cwd: &Path) -> Result<SessionStatus> {
        self.record(format!("shell {}", cwd.display()));
        if self.shell_panics.get() {
            panic!("shell crashed");
        }
        Ok(self.shell_status.get())
    }
}
