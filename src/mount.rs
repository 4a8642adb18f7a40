//! Staged mounts
//!
//! Builds the remote mount and the decrypted overlay on top of it inside
//! a fresh workspace directory. Every step is registered on the
//! [`ResourceStack`] as soon as it succeeds; nothing here cleans up on
//! failure, that is the stack's job.

use crate::error::{Error, Result};
use crate::stack::ResourceStack;
use crate::tools::{RemoteMount, Tools};
use crate::validate::Target;
use std::fmt;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Remote mount point, relative to the workspace
pub const REMOTE_MOUNT_DIR: &str = "mnt";

/// Decrypted overlay mount point, relative to the workspace
pub const OVERLAY_MOUNT_DIR: &str = "emnt";

const WORKSPACE_MODE: u32 = 0o700;
const MOUNT_POINT_MODE: u32 = 0o755;

/// A single acquisition step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Workspace,
    RemoteMountPoint,
    RemoteMount,
    OverlayMountPoint,
    OverlayMount,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Workspace => "create mount workspace",
            Stage::RemoteMountPoint => "create remote mount point",
            Stage::RemoteMount => "mount remote directory",
            Stage::OverlayMountPoint => "create decrypted mount point",
            Stage::OverlayMount => "mount decrypted view",
        };
        f.write_str(s)
    }
}

/// Owner the mounted tree is presented as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// The invoking user, with the group optionally overridden
    pub fn current(gid_override: Option<u32>) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = gid_override.unwrap_or_else(|| unsafe { libc::getgid() });
        Identity { uid, gid }
    }
}

/// Paths of a fully staged workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMounts {
    pub workspace: PathBuf,
    pub remote_mount_point: PathBuf,
    pub overlay_mount_point: PathBuf,
}

/// Stage both mounts under `workspace`
///
/// On error, the resources acquired so far stay on `stack`.
pub fn stage<'a>(
    workspace: &Path,
    target: &Target<'_>,
    identity: Identity,
    tools: Tools<'a>,
    stack: &mut ResourceStack<'a>,
) -> Result<StagedMounts> {
    let remote_mount_point = workspace.join(REMOTE_MOUNT_DIR);
    let overlay_mount_point = workspace.join(OVERLAY_MOUNT_DIR);

    create_dir(stack, Stage::Workspace, workspace, WORKSPACE_MODE)?;
    create_dir(stack, Stage::RemoteMountPoint, &remote_mount_point, MOUNT_POINT_MODE)?;

    let request = RemoteMount {
        host: target.host,
        remote_dir: &target.spec.remote_dir,
        mount_point: &remote_mount_point,
        read_only: !target.read_write,
        uid: identity.uid,
        gid: identity.gid,
    };
    mount(stack, Stage::RemoteMount, tools, &remote_mount_point, || {
        tools.remote.mount_remote(&request)
    })?;

    create_dir(stack, Stage::OverlayMountPoint, &overlay_mount_point, MOUNT_POINT_MODE)?;

    mount(stack, Stage::OverlayMount, tools, &overlay_mount_point, || {
        tools.overlay.mount_overlay(
            &remote_mount_point,
            &overlay_mount_point,
            &target.spec.encfs_config,
        )
    })?;

    info!("Decrypted view of '{}' available at {:?}", target.spec.name, overlay_mount_point);

    Ok(StagedMounts {
        workspace: workspace.to_path_buf(),
        remote_mount_point,
        overlay_mount_point,
    })
}

fn create_dir(stack: &mut ResourceStack<'_>, stage: Stage, path: &Path, mode: u32) -> Result<()> {
    let owned = path.to_path_buf();
    stack
        .acquire(
            format!("remove {}", path.display()),
            || {
                debug!("Creating {:?} ({:o})", path, mode);
                DirBuilder::new()
                    .mode(mode)
                    .create(path)
                    .map_err(|source| Error::Directory {
                        path: path.to_path_buf(),
                        source,
                    })
            },
            move || {
                std::fs::remove_dir(&owned).map_err(|source| Error::Directory {
                    path: owned.clone(),
                    source,
                })
            },
        )
        .map_err(|e| acquisition(stage, e))
}

fn mount<'a, F>(
    stack: &mut ResourceStack<'a>,
    stage: Stage,
    tools: Tools<'a>,
    mount_point: &Path,
    action: F,
) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let owned = mount_point.to_path_buf();
    let unmounter = tools.unmounter;
    stack
        .acquire(
            format!("unmount {}", mount_point.display()),
            action,
            move || unmounter.unmount(&owned),
        )
        .map_err(|e| acquisition(stage, e))
}

fn acquisition(stage: Stage, source: Error) -> Error {
    Error::Acquisition {
        stage,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MountSpec};
    use crate::testing::FakeTools;
    use crate::validate::validate;
    use tempfile::tempdir;

    fn config() -> Config {
        let mut config = Config::default();
        config.host = "nas".to_string();
        config.mounts = vec![MountSpec {
            name: "archive".to_string(),
            remote_dir: "/srv/archive".to_string(),
            encfs_config: PathBuf::from("/keys/archive.xml"),
            checksum_file: PathBuf::new(),
        }];
        config.select("archive");
        config
    }

    const ME: Identity = Identity { uid: 1000, gid: 100 };

    #[test]
    fn test_stage_success() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        let mut stack = ResourceStack::new();

        let staged = stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap();

        assert_eq!(staged.overlay_mount_point, workspace.join("emnt"));
        assert!(staged.remote_mount_point.is_dir());
        assert!(staged.overlay_mount_point.is_dir());
        assert_eq!(stack.len(), 5);
        assert_eq!(
            fake.journal(),
            vec![
                format!("remote nas:/srv/archive {} ro uid=1000 gid=100", staged.remote_mount_point.display()),
                format!(
                    "overlay {} {} /keys/archive.xml",
                    staged.remote_mount_point.display(),
                    staged.overlay_mount_point.display()
                ),
            ]
        );

        stack.unwind_all().unwrap();
        assert!(!workspace.exists());
    }

    #[test]
    fn test_stage_workspace_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        let mut stack = ResourceStack::new();

        stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap();

        let mode = std::fs::metadata(&workspace).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        stack.unwind_all().unwrap();
    }

    #[test]
    fn test_stage_read_write() {
        let dir = tempdir().unwrap();
        let mut config = config();
        config.mount_read_write = true;
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        let mut stack = ResourceStack::new();

        stage(&dir.path().join("ws"), &target, ME, fake.tools(), &mut stack).unwrap();

        assert!(!fake.journal()[0].contains(" ro "));
        stack.unwind_all().unwrap();
    }

    #[test]
    fn test_existing_workspace_is_not_reused() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        let mut stack = ResourceStack::new();

        let err = stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap_err();

        assert!(matches!(err, Error::Acquisition { stage: Stage::Workspace, .. }));
        assert!(stack.is_empty());
        assert!(fake.journal().is_empty());
        // Someone else's directory is left alone
        assert!(workspace.exists());
    }

    #[test]
    fn test_remote_mount_failure() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        fake.fail_remote_mount();
        let mut stack = ResourceStack::new();

        let err = stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap_err();

        assert!(matches!(err, Error::Acquisition { stage: Stage::RemoteMount, .. }));
        assert_eq!(stack.len(), 2);

        stack.unwind_all().unwrap();
        assert!(!workspace.exists());
        assert!(!fake.journal().iter().any(|l| l.starts_with("unmount")));
    }

    #[test]
    fn test_overlay_failure_leaves_prior_steps_on_stack() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        fake.fail_overlay_mount();
        let mut stack = ResourceStack::new();

        let err = stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap_err();

        assert!(matches!(err, Error::Acquisition { stage: Stage::OverlayMount, .. }));
        assert!(err.to_string().starts_with("Failed to mount decrypted view"));
        assert_eq!(stack.len(), 4);
        assert!(workspace.join("emnt").is_dir());

        stack.unwind_all().unwrap();

        let unmounts: Vec<String> = fake
            .journal()
            .into_iter()
            .filter(|l| l.starts_with("unmount"))
            .collect();
        assert_eq!(unmounts, vec![format!("unmount {}", workspace.join("mnt").display())]);
        assert!(!workspace.exists());
    }

    #[test]
    fn test_overlay_mount_point_taken() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let config = config();
        let target = validate(&config).unwrap();
        let fake = FakeTools::new();
        fake.remote_mount_creates(workspace.join("emnt"));
        let mut stack = ResourceStack::new();

        let err = stage(&workspace, &target, ME, fake.tools(), &mut stack).unwrap_err();

        assert!(matches!(err, Error::Acquisition { stage: Stage::OverlayMountPoint, .. }));
        let mnt = workspace.join("mnt");
        assert_eq!(
            stack.labels(),
            vec![
                format!("remove {}", workspace.display()),
                format!("remove {}", mnt.display()),
                format!("unmount {}", mnt.display()),
            ]
        );

        // Not ours to remove
        std::fs::remove_dir(workspace.join("emnt")).unwrap();
        stack.unwind_all().unwrap();

        let journal = fake.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1], format!("unmount {}", mnt.display()));
        assert!(!workspace.exists());
    }

    #[test]
    fn test_identity_override() {
        let identity = Identity::current(Some(4242));
        assert_eq!(identity.gid, 4242);
        assert_eq!(identity.uid, unsafe { libc::getuid() });
    }
}
