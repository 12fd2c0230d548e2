use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::backends::SyncError;
use crate::resource::Hook;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run `hook` and wait for it, killing it once its timeout elapses.
///
/// The command line is split on whitespace; no shell is involved.
/// `stage` names the hook in errors ("Pre-update", "Post-update").
pub fn run_command(hook: &Hook, stage: &'static str) -> Result<(), SyncError> {
    let fail = |reason: String| SyncError::Hook { stage, reason };

    let mut args = hook.command.split_whitespace();
    let program = args.next().ok_or_else(|| fail("empty command".into()))?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| fail(format!("{program}: {e}")))?;

    let deadline = Instant::now() + hook.timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                debug!("{stage} command {:?} succeeded", hook.command);
                return Ok(());
            }
            Ok(Some(status)) => return Err(fail(format!("{:?} exited with {status}", hook.command))),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(fail(format!(
                    "{:?} timed out after {}s",
                    hook.command,
                    hook.timeout.as_secs()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(fail(e.to_string())),
        }
    }
}
