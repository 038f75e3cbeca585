pub mod constraints;
mod galform;
pub mod results;
pub mod template;

pub use galform::GalformRunner;

use crate::{
    config::{ConfigErrors, RunnerConfig},
    executors::{CommandExecutor, JobCommand},
    queue::{OracleError, QueueOracle},
    scheduler::{Job, ScheduleReport, SchedulerError, Sleeper, Throttle},
};
use clap::ValueEnum;
use constraints::{Probability, ScoreError};
use results::ResultError;
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::Path, path::PathBuf, str::FromStr};
use template::TemplateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    UnsupportedCluster(#[from] UnsupportedCluster),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Results(#[from] ResultError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error("Failed to remove {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cannot start a new generation while the previous one is {0}")]
    GenerationInProgress(GenerationPhase),
    #[error("Particle {index} is outside of a swarm of size {swarm_size}")]
    ParticleOutOfRange { index: usize, swarm_size: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported cluster `{0}`, supported are geryon and geryon2")]
pub struct UnsupportedCluster(pub String);

/// Supported semi-analytic models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamFlavour {
    #[default]
    Galform,
    Shark,
}

impl fmt::Display for SamFlavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Galform => f.write_str("galform"),
            Self::Shark => f.write_str("shark"),
        }
    }
}

/// Clusters we know how to submit to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cluster {
    /// requires jobs to be submitted to the hard queue
    Geryon,
    Geryon2,
}

impl Cluster {
    pub fn submit_command(&self, program: &str, script: &Path) -> JobCommand {
        match self {
            Self::Geryon => JobCommand::new(program).arg("-hard").arg(script),
            Self::Geryon2 => JobCommand::new(program).arg(script),
        }
    }
}

impl FromStr for Cluster {
    type Err = UnsupportedCluster;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "geryon" => Ok(Self::Geryon),
            "geryon2" => Ok(Self::Geryon2),
            _ => Err(UnsupportedCluster(name.to_owned())),
        }
    }
}

/// Where a runner is within one PSO generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationPhase {
    #[default]
    Idle,
    InputsPrepared,
    Submitting,
    Draining,
    ResultsAvailable,
    Cleaned,
}

impl GenerationPhase {
    /// a new generation may only begin from here
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Cleaned)
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::InputsPrepared => "inputs prepared",
            Self::Submitting => "submitting",
            Self::Draining => "draining",
            Self::ResultsAvailable => "results available",
            Self::Cleaned => "cleaned",
        };

        f.write_str(name)
    }
}

/// One semi-analytic model driven through a PSO generation.
///
/// A generation is `run` (prepare, submit, drain), then `get_probabilities`
/// for every particle, then `remove_generated_files`.
pub trait SamRunner {
    fn swarm_size(&self) -> usize;

    fn phase(&self) -> GenerationPhase;

    /// write one input file per (particle, box)
    fn prepare_inputs(&mut self) -> Result<(), RunnerError>;

    /// one submission per (particle, box)
    fn build_commands(&self) -> Result<Vec<Job>, RunnerError>;

    fn count_live_jobs(&self) -> Result<usize, OracleError>;

    /// prepare, submit and block until the queue has drained
    fn run(&mut self, throttle: Throttle) -> Result<ScheduleReport, RunnerError>;

    fn get_probabilities(&self, particle: usize) -> Result<Vec<Probability>, RunnerError>;

    /// delete all per particle output, missing files are fine
    fn remove_generated_files(&mut self) -> Result<(), RunnerError>;
}

/// Lets a runner's own live job count drive the scheduler
struct LiveJobs<'a, R: ?Sized>(&'a R);

impl<R: SamRunner + ?Sized> QueueOracle for LiveJobs<'_, R> {
    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        self.0.count_live_jobs()
    }
}

/// All runner variants, selected once at start up
pub enum SamRunners {
    Galform(GalformRunner),
}

impl SamRunners {
    pub fn load(
        flavour: SamFlavour,
        config: RunnerConfig,
        executor: Box<dyn CommandExecutor>,
        sleeper: Box<dyn Sleeper>,
    ) -> Result<Self, ConfigErrors> {
        match flavour {
            SamFlavour::Galform => Ok(Self::Galform(GalformRunner::new(config, executor, sleeper))),
            SamFlavour::Shark => Err(ConfigErrors::SamNotSupported(flavour)),
        }
    }

    fn inner(&self) -> &dyn SamRunner {
        match self {
            Self::Galform(runner) => runner,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SamRunner {
        match self {
            Self::Galform(runner) => runner,
        }
    }
}

impl SamRunner for SamRunners {
    fn swarm_size(&self) -> usize {
        self.inner().swarm_size()
    }

    fn phase(&self) -> GenerationPhase {
        self.inner().phase()
    }

    fn prepare_inputs(&mut self) -> Result<(), RunnerError> {
        self.inner_mut().prepare_inputs()
    }

    fn build_commands(&self) -> Result<Vec<Job>, RunnerError> {
        self.inner().build_commands()
    }

    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        self.inner().count_live_jobs()
    }

    fn run(&mut self, throttle: Throttle) -> Result<ScheduleReport, RunnerError> {
        self.inner_mut().run(throttle)
    }

    fn get_probabilities(&self, particle: usize) -> Result<Vec<Probability>, RunnerError> {
        self.inner().get_probabilities(particle)
    }

    fn remove_generated_files(&mut self) -> Result<(), RunnerError> {
        self.inner_mut().remove_generated_files()
    }
}
