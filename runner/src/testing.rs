//! Fakes shared by the unit tests: nothing in here talks to a real queue.

use crate::{
    executors::{CommandExecutor, CommandOutput, ExecutorError, JobCommand},
    queue::{OracleError, QueueOracle},
    scheduler::Sleeper,
};
use std::{
    cell::RefCell,
    collections::VecDeque,
    ffi::OsString,
    io,
    rc::Rc,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execute(JobCommand),
    Poll(usize),
    Sleep(Duration),
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// every command an executor was asked to run, in order
pub fn executed(log: &EventLog) -> Vec<JobCommand> {
    log.borrow()
        .iter()
        .filter_map(|event| match event {
            Event::Execute(command) => Some(command.clone()),
            _ => None,
        })
        .collect()
}

/// Executor that records every command instead of running it
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    log: EventLog,
    stdout: Vec<u8>,
    status: i32,
    failing: Vec<OsString>,
    unlaunchable: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.as_bytes().to_vec();
        self
    }

    /// every command exits with `status`
    pub fn failing_with(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    /// commands carrying `arg` exit with status 1
    pub fn failing_for(mut self, arg: impl Into<OsString>) -> Self {
        self.failing.push(arg.into());
        self
    }

    pub fn unlaunchable(mut self) -> Self {
        self.unlaunchable = true;
        self
    }

    pub fn commands(&self) -> Vec<JobCommand> {
        executed(&self.log)
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, command: &JobCommand) -> Result<CommandOutput, ExecutorError> {
        if self.unlaunchable {
            return Err(ExecutorError::Launch {
                command: command.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "not found"),
            });
        }

        self.log.borrow_mut().push(Event::Execute(command.clone()));

        let status = if command.args.iter().any(|arg| self.failing.contains(arg)) {
            1
        } else {
            self.status
        };

        Ok(CommandOutput {
            stdout: self.stdout.clone(),
            stderr: if status == 0 {
                Vec::new()
            } else {
                b"submission rejected".to_vec()
            },
            status,
        })
    }
}

/// Oracle replaying a fixed sequence of live counts.
///
/// Once the script runs out it keeps answering zero, or fails if built with
/// `failing_after`.
#[derive(Debug)]
pub struct ScriptedOracle {
    log: EventLog,
    counts: RefCell<VecDeque<usize>>,
    fail_when_exhausted: bool,
}

impl ScriptedOracle {
    pub fn new(counts: &[usize], log: EventLog) -> Self {
        Self {
            log,
            counts: RefCell::new(counts.iter().copied().collect()),
            fail_when_exhausted: false,
        }
    }

    pub fn failing_after(counts: &[usize], log: EventLog) -> Self {
        Self {
            fail_when_exhausted: true,
            ..Self::new(counts, log)
        }
    }
}

impl QueueOracle for ScriptedOracle {
    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        match self.counts.borrow_mut().pop_front() {
            Some(count) => {
                self.log.borrow_mut().push(Event::Poll(count));
                Ok(count)
            }
            None if self.fail_when_exhausted => Err(OracleError::Failed {
                command: JobCommand::new("qstat"),
                status: 1,
                stdout: String::new(),
                stderr: "cannot reach qmaster".to_owned(),
            }),
            None => {
                self.log.borrow_mut().push(Event::Poll(0));
                Ok(0)
            }
        }
    }
}

/// Sleeper that only writes down how long it was asked to wait
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    log: EventLog,
}

impl RecordingSleeper {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.log.borrow_mut().push(Event::Sleep(duration));
    }
}
