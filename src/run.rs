//! End-to-end run: validate, stage, session, checksum, teardown

use crate::checksum;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mount::{self, Identity};
use crate::session::{self, SessionStatus, SignalGuard};
use crate::stack::ResourceStack;
use crate::tools::Tools;
use crate::validate::validate;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the interactive session ended
    pub session: SessionStatus,
    /// Manifest that was rewritten, if checksumming was requested
    pub manifest: Option<PathBuf>,
}

/// Make the selected target available for one interactive session
///
/// Validation runs before anything is created. Every acquired resource is
/// released before this returns, whatever happened in between; if a
/// release fails the error names it. A panic inside the session still
/// releases everything through the stack's drop.
///
/// Keyboard interrupts are ignored from the first acquisition until
/// teardown has finished. They still reach the external tools, so an
/// interrupted mount fails its stage and the run unwinds.
pub fn run(config: &Config, tools: Tools<'_>) -> Result<RunReport> {
    let target = validate(config)?;
    let identity = Identity::current(target.gid);

    // Dropped after the stack, which is declared below it
    let _interrupts = match SignalGuard::ignore_interrupts() {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };
    let mut stack = ResourceStack::new();

    let outcome = (|| -> Result<RunReport> {
        let staged = mount::stage(&config.workspace, &target, identity, tools, &mut stack)?;
        let status = session::run(tools.shell, &staged.overlay_mount_point)?;

        let manifest = match target.checksum_program {
            Some(program) => Some(checksum::verify(
                target.spec,
                program,
                &staged.overlay_mount_point,
                tools.checksum,
            )?),
            None => None,
        };

        Ok(RunReport {
            session: status,
            manifest,
        })
    })();

    let teardown = stack.unwind_all();

    match (outcome, teardown) {
        (Ok(report), Ok(())) => {
            info!("All resources released");
            Ok(report)
        }
        (Ok(_), Err(failure)) => {
            log_manual_cleanup(failure.labels());
            Err(Error::Teardown(failure))
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(failure)) => {
            log_manual_cleanup(failure.labels());
            Err(e.with_teardown(failure))
        }
    }
}

fn log_manual_cleanup<'a>(labels: impl Iterator<Item = &'a str>) {
    for label in labels {
        error!("Needs manual cleanup: {}", label);
    }
}
