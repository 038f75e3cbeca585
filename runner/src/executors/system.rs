use super::{CommandExecutor, CommandOutput, ExecutorError, JobCommand};
use std::{
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};
use tracing::{debug, trace};

/// Executor that spawns real child processes on this host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, command: &JobCommand) -> Result<CommandOutput, ExecutorError> {
        let start = Instant::now();

        // NOTE: no timeout, a hanging submit or status command stalls the caller
        let output = Command::new(&command.program)
            .args(command.args.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ExecutorError::Launch {
                command: command.clone(),
                source,
            })?;

        let status = exit_code(output.status);
        debug!(
            command = %command,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );
        trace!(stdout = %String::from_utf8_lossy(&output.stdout), "Command output");

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status,
        })
    }
}

/// shell convention: processes killed by a signal report 128 + signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
