use crate::executors::{CommandExecutor, ExecutorError, JobCommand};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Couldn't run the queue status command: {0}")]
    Unavailable(#[from] ExecutorError),
    #[error("`{command}` failed with code {status}: stdout: {stdout}, stderr: {stderr}")]
    Failed {
        command: JobCommand,
        status: i32,
        stdout: String,
        stderr: String,
    },
}

/// Reports how many jobs of this run are currently queued or executing.
///
/// Failures are never mapped to zero, a false zero leads to over-submission.
pub trait QueueOracle {
    fn count_live_jobs(&self) -> Result<usize, OracleError>;
}

impl<T: QueueOracle + ?Sized> QueueOracle for &T {
    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        (**self).count_live_jobs()
    }
}

/// Counts the lines of a status command's stdout that mention the job tag.
///
/// Substring matching keeps this independent of the exact column layout of
/// the queue system in use.
#[derive(Debug)]
pub struct StatusCommandOracle<'a, E: ?Sized> {
    executor: &'a E,
    command: &'a JobCommand,
    tag: &'a str,
}

impl<'a, E: CommandExecutor + ?Sized> StatusCommandOracle<'a, E> {
    pub fn new(executor: &'a E, command: &'a JobCommand, tag: &'a str) -> Self {
        Self {
            executor,
            command,
            tag,
        }
    }
}

impl<E: CommandExecutor + ?Sized> QueueOracle for StatusCommandOracle<'_, E> {
    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        let output = self.executor.execute(self.command)?;

        if !output.success() {
            error!(command = %self.command, status = output.status, "Queue status command failed");

            return Err(OracleError::Failed {
                command: self.command.clone(),
                status: output.status,
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
            });
        }

        let live = count_tagged_lines(&output.stdout_lossy(), self.tag);
        debug!(tag = self.tag, live, "Polled queue");

        Ok(live)
    }
}

fn count_tagged_lines(listing: &str, tag: &str) -> usize {
    listing.lines().filter(|line| line.contains(tag)).count()
}
