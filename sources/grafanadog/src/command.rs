//! Running host commands with a bound on how long we wait for them.

use crate::error::{self, Result};
use log::{debug, warn};
use snafu::{ensure, ResultExt};
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// How long any single host command may take.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) status: ExitStatus,
    pub(crate) stderr: String,
}

/// Runs `program` with `args`, killing it if it's still going after `timeout`.  Returns how it
/// exited; a non-zero exit is not an error here.
pub(crate) fn run(program: &str, args: &[&str], timeout: Duration) -> Result<Finished> {
    let command = format!("{} {}", program, args.join(" "));
    debug!("Running '{}'", command);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context(error::CommandSpawnSnafu { command: &command })?;

    let status = match child
        .wait_timeout(timeout)
        .context(error::CommandWaitSnafu { command: &command })?
    {
        Some(status) => status,
        None => {
            warn!("'{}' timed out, killing it", command);
            // It may have exited in the meantime; either way it's gone after this.
            let _ = child.kill();
            let _ = child.wait();
            return error::CommandTimeoutSnafu {
                command,
                seconds: timeout.as_secs(),
            }
            .fail();
        }
    };

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }
    Ok(Finished {
        status,
        stderr: stderr.trim().to_string(),
    })
}

/// Like `run`, but a non-zero exit is an error carrying the command's stderr.
pub(crate) fn run_checked(program: &str, args: &[&str], timeout: Duration) -> Result<()> {
    let finished = run(program, args, timeout)?;
    ensure!(
        finished.status.success(),
        error::CommandFailedSnafu {
            command: format!("{} {}", program, args.join(" ")),
            stderr: finished.stderr,
        }
    );
    Ok(())
}
