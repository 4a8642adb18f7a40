//! Interactive session over the decrypted tree

use crate::error::{Error, Result};
use crate::tools::ShellRunner;
use nix::sys::signal::{signal, SigHandler, Signal};
use std::fmt;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// How the interactive shell ended
///
/// None of these is an error; the session is only a window of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Shell exited with a status code
    Exited(i32),
    /// Shell was killed by a signal
    Signaled(i32),
}

impl SessionStatus {
    pub fn success(&self) -> bool {
        matches!(self, SessionStatus::Exited(0))
    }
}

impl From<ExitStatus> for SessionStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => SessionStatus::Exited(code),
            (None, Some(sig)) => SessionStatus::Signaled(sig),
            (None, None) => SessionStatus::Exited(-1),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Exited(code) => write!(f, "exited with status {}", code),
            SessionStatus::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// Run the interactive shell rooted at `root` and wait for it to end
pub fn run(shell: &dyn ShellRunner, root: &Path) -> Result<SessionStatus> {
    info!("Starting session in {:?}", root);
    let status = shell.run_shell(root)?;
    if status.success() {
        info!("Session ended");
    } else {
        warn!("Session {}", status);
    }
    Ok(status)
}

/// Signals a keyboard interrupt sends to the whole foreground group
const INTERRUPTS: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

struct Installed {
    guards: usize,
    saved: Vec<(Signal, SigHandler)>,
}

static INSTALLED: Mutex<Option<Installed>> = Mutex::new(None);

/// Ignores SIGINT and SIGQUIT until dropped
///
/// Child processes share our terminal and process group, so keyboard
/// interrupts aimed at a hung mount or at the shell reach us too. Guards
/// nest: the first one installs `SIG_IGN`, the last one dropped restores
/// the previous handlers. Children spawned meanwhile should go through
/// [`default_interrupts_in_child`].
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    pub fn ignore_interrupts() -> Result<Self> {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        match installed.as_mut() {
            Some(active) => active.guards += 1,
            None => {
                let mut saved = Vec::new();
                for sig in INTERRUPTS {
                    // SAFETY: SIG_IGN installs no handler code
                    match unsafe { signal(sig, SigHandler::SigIgn) } {
                        Ok(previous) => saved.push((sig, previous)),
                        Err(e) => {
                            restore(saved);
                            return Err(Error::Internal(format!("Failed to ignore {}: {}", sig, e)));
                        }
                    }
                }
                debug!("Ignoring keyboard interrupts");
                *installed = Some(Installed { guards: 1, saved });
            }
        }
        Ok(SignalGuard { _private: () })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        let last = match installed.as_mut() {
            Some(active) => {
                active.guards -= 1;
                active.guards == 0
            }
            None => false,
        };
        if last {
            if let Some(active) = installed.take() {
                restore(active.saved);
                debug!("Keyboard interrupts restored");
            }
        }
    }
}

fn restore(saved: Vec<(Signal, SigHandler)>) {
    for (sig, handler) in saved.into_iter().rev() {
        // SAFETY: restores the handler that was installed before
        if let Err(e) = unsafe { signal(sig, handler) } {
            warn!("Failed to restore {} handler: {}", sig, e);
        }
    }
}

/// Give `cmd`'s process the default SIGINT and SIGQUIT dispositions
///
/// Ignored signals stay ignored across exec, so without this a tool
/// started under a [`SignalGuard`] could not be interrupted.
pub fn default_interrupts_in_child(cmd: &mut Command) {
    // SAFETY: the hook only calls sigaction, which is async-signal-safe
    unsafe {
        cmd.pre_exec(|| {
            for sig in INTERRUPTS {
                signal(sig, SigHandler::SigDfl).map_err(io::Error::from)?;
            }
            Ok(())
        });
    }
}
