
use crate::{
    executors::{CommandExecutor, ExecutorError, JobCommand},
    queue::{OracleError, QueueOracle},
};
use std::{collections::VecDeque, thread, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to query the queue: {0}")]
    Oracle(#[from] OracleError),
    #[error("Failed to submit a job: {0}")]
    Launch(#[from] ExecutorError),
}

/// A single submittable unit of work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// human readable identification, only used for logging
    pub label: String,
    pub command: JobCommand,
}

/// Only suspension point of the scheduler, swapped out in tests
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// ceiling for queued + running jobs carrying our tag
    pub max_concurrent: usize,
    /// pause between two queue polls
    pub interval: Duration,
}

#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// number of jobs handed to the queue per round, including empty rounds
    pub rounds: Vec<usize>,
    pub submitted: usize,
    /// jobs whose submit command exited non-zero, they are not retried
    pub failed: Vec<Job>,
    pub polls: usize,
}

/// Submit `jobs` without exceeding `throttle.max_concurrent` live jobs and
/// block until the oracle reports an empty queue.
///
/// `on_drain` is called once, after the last submission and before the
/// first drain poll.
pub fn run_jobs(
    jobs: Vec<Job>,
    throttle: Throttle,
    executor: &dyn CommandExecutor,
    oracle: &dyn QueueOracle,
    sleeper: &dyn Sleeper,
    on_drain: &dyn Fn(),
) -> Result<ScheduleReport, SchedulerError> {
    let mut report = submit_all(jobs, throttle, executor, oracle, sleeper)?;
    on_drain();
    drain(throttle.interval, oracle, sleeper, &mut report)?;

    Ok(report)
}

/// Hand every job to the queue, at most as many per round as the oracle
/// leaves slots free.
///
/// The number of free slots is recomputed from the oracle on every round,
/// so jobs finishing early or jobs submitted by someone else under the same
/// tag are accounted for. A ceiling of zero never submits anything and
/// loops forever, callers have to reject it beforehand.
#[instrument(skip_all, fields(jobs = jobs.len(), max_concurrent = throttle.max_concurrent))]
fn submit_all(
    jobs: Vec<Job>,
    throttle: Throttle,
    executor: &dyn CommandExecutor,
    oracle: &dyn QueueOracle,
    sleeper: &dyn Sleeper,
) -> Result<ScheduleReport, SchedulerError> {
    info!(
        "Scheduling {} jobs with maximum concurrency {}",
        jobs.len(),
        throttle.max_concurrent
    );

    let mut report = ScheduleReport::default();
    let mut pending = VecDeque::from(jobs);

    while !pending.is_empty() {
        let live = oracle.count_live_jobs()?;
        report.polls += 1;

        let slots = throttle.max_concurrent.saturating_sub(live);
        let batch = pending
            .drain(..slots.min(pending.len()))
            .collect::<Vec<_>>();

        info!("Submitting {} jobs, {} remaining", batch.len(), pending.len());
        report.rounds.push(batch.len());

        for job in batch {
            submit(job, executor, &mut report)?;
        }

        if !pending.is_empty() {
            sleeper.sleep(throttle.interval);
        }
    }

    info!(
        submitted = report.submitted,
        failed = report.failed.len(),
        "Everything has been submitted"
    );

    Ok(report)
}

/// Block until the oracle reports no live jobs, polling every `interval`
#[instrument(skip_all)]
fn drain(
    interval: Duration,
    oracle: &dyn QueueOracle,
    sleeper: &dyn Sleeper,
    report: &mut ScheduleReport,
) -> Result<(), SchedulerError> {
    info!("Waiting for the queue to drain");

    loop {
        let live = oracle.count_live_jobs()?;
        report.polls += 1;

        if live == 0 {
            break;
        }

        debug!(live, "Queue not drained yet");
        sleeper.sleep(interval);
    }

    info!("Queue drained");

    Ok(())
}

fn submit(
    job: Job,
    executor: &dyn CommandExecutor,
    report: &mut ScheduleReport,
) -> Result<(), SchedulerError> {
    let output = executor.execute(&job.command)?;

    if output.success() {
        debug!(job = %job.label, "Submitted");
        report.submitted += 1;
    } else {
        error!(
            job = %job.label,
            command = %job.command,
            status = output.status,
            stdout = %output.stdout_lossy(),
            stderr = %output.stderr_lossy(),
            "Error when submitting job, it will not be retried"
        );
        report.failed.push(job);
    }

    Ok(())
}
