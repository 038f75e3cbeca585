mod system;

pub use system::SystemExecutor;

use std::{ffi::OsString, fmt, io};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: JobCommand,
        #[source]
        source: io::Error,
    },
}

/// An external program together with its arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl JobCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;

        for arg in self.args.iter() {
            write!(f, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// everything a finished child process left behind
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs a command to completion and captures both output streams.
///
/// A command that could not be started at all is an `ExecutorError::Launch`,
/// a command that started and exited non-zero is an `Ok` with a non-zero status.
pub trait CommandExecutor {
    fn execute(&self, command: &JobCommand) -> Result<CommandOutput, ExecutorError>;
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for &T {
    fn execute(&self, command: &JobCommand) -> Result<CommandOutput, ExecutorError> {
        (**self).execute(command)
    }
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for Box<T> {
    fn execute(&self, command: &JobCommand) -> Result<CommandOutput, ExecutorError> {
        (**self).execute(command)
    }
}

#[cfg(test)]
mod tests {
    use super::JobCommand;

    #[test]
    fn display_joins_program_and_arguments() {
        let command = JobCommand::new("qsub").arg("-hard").arg("/tmp/run.csh");

        assert_eq!(command.to_string(), "qsub -hard /tmp/run.csh");
    }
}
