use crate::{
    pso::SwarmWeights,
    sam::{
        constraints::{parse_constraints, Constraint, UnknownConstraint},
        Cluster, SamFlavour,
    },
    scheduler::Throttle,
    util::fully_normalized,
};
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::File,
    io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read configuration file {path:?}: {source}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Configuration file is invalid: {0}")]
    InvalidFile(#[from] serde_yaml::Error),
    #[error("Failed to normalize {path:?}: {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    UnknownConstraint(#[from] UnknownConstraint),
    #[error("Running PSO for {0} is not yet supported")]
    SamNotSupported(SamFlavour),
    #[error("Configuration contains errors, see above")]
    PreflightFailed,
}

/// Drive a particle swarm optimization whose fitness comes from a semi-analytic
/// model running as cluster jobs
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML file with settings, command line options take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub swarm: SwarmArgs,

    #[command(flatten)]
    pub sam: SamArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(flatten)]
    pub general: GeneralArgs,
}

#[derive(Args, Debug, Default)]
#[command(next_help_heading = "Swarm options")]
pub struct SwarmArgs {
    /// Size of the swarm [default: 50]
    #[arg(short = 's', long)]
    pub swarm_size: Option<usize>,
    /// Number of iterations to execute [default: 100]
    #[arg(short = 'n', long)]
    pub num_steps: Option<usize>,
    /// Inertia scaling factor [default: 0.72]
    #[arg(short = 'i', long)]
    pub inertia_weight: Option<f64>,
    /// Individual best scaling factor [default: 1.193]
    #[arg(short = 'b', long)]
    pub best_weight: Option<f64>,
    /// Global best scaling factor [default: 1.193]
    #[arg(short = 'g', long)]
    pub global_weight: Option<f64>,
}

#[derive(Args, Debug, Default)]
#[command(next_help_heading = "SAM options")]
pub struct SamArgs {
    /// Which semi-analytic model software is being run [default: galform]
    #[arg(short = 'S', long, value_enum)]
    pub sam: Option<SamFlavour>,
    /// Directory with simulation output [default: ~/pso-sam/sim-output]
    #[arg(short = 'd', long)]
    pub sim_dir: Option<PathBuf>,
    /// Directory where the SAM software can be found [default: ~/pso-sam/sam]
    #[arg(short = 'D', long)]
    pub sam_dir: Option<PathBuf>,
    /// Number of boxes to evaluate on each step [default: 4]
    #[arg(short = 'N', long)]
    pub num_boxes: Option<usize>,
    /// The box size [default: 39.6850263]
    #[arg(short = 'B', long)]
    pub box_size: Option<f64>,
    /// Output directory of the semi-analytic model [default: ~/pso-sam/sam-output]
    #[arg(short = 'O', long)]
    pub output_dir_sam: Option<PathBuf>,
    /// Comma separated constraints to score against (bh_bulge, hi_massfunc, st_massfunc)
    #[arg(short = 'C', long, alias = "constrains")]
    pub constraints: Option<String>,
}

#[derive(Args, Debug, Default)]
#[command(next_help_heading = "Queue system options")]
pub struct QueueArgs {
    /// Maximum number of jobs to run concurrently [default: 100]
    #[arg(short = 'j', long)]
    pub max_jobs: Option<usize>,
    /// Waiting time between job queue checks in seconds [default: 10]
    #[arg(short = 'w', long)]
    pub wait_time: Option<u64>,
}

#[derive(Args, Debug, Default)]
#[command(next_help_heading = "General options")]
pub struct GeneralArgs {
    /// Cluster where this tool is running [default: geryon]
    #[arg(short = 'c', long)]
    pub cluster: Option<String>,
    /// Directory where observational data is found [default: ~/pso-sam/obsdata]
    #[arg(short = 'o', long)]
    pub obs_dir: Option<PathBuf>,
    /// Path to power spectrum file [default: ~/pso-sam/Power_Spec/pk_MassiveBlack2_norm.dat]
    #[arg(short = 'p', long)]
    pub pkfile: Option<PathBuf>,
    /// Directory where submission scripts will be written into [default: ~/pso-sam/scripts]
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PsoConfig {
    pub swarm: SwarmConfig,
    pub sam: SamConfig,
    pub queue: QueueConfig,
    pub general: GeneralConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SwarmConfig {
    pub size: usize,
    pub steps: usize,
    pub inertia_weight: f64,
    pub best_weight: f64,
    pub global_weight: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SamConfig {
    pub flavour: SamFlavour,
    pub sim_dir: PathBuf,
    pub sam_dir: PathBuf,
    #[serde(alias = "output_dir_sam")]
    pub output_dir: PathBuf,
    pub num_boxes: usize,
    pub box_size: f64,
    pub constraints: BTreeSet<Constraint>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct QueueConfig {
    pub max_jobs: usize,
    /// seconds between two queue polls
    pub wait_time: u64,
    /// program used to submit one job script
    pub submit: String,
    /// program listing queued and running jobs
    pub status: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct GeneralConfig {
    pub cluster: String,
    pub obs_dir: PathBuf,
    pub pkfile: PathBuf,
    pub scripts_dir: PathBuf,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            size: 50,
            steps: 100,
            inertia_weight: 0.72,
            best_weight: 1.193,
            global_weight: 1.193,
        }
    }
}

impl Default for SamConfig {
    fn default() -> Self {
        Self {
            flavour: SamFlavour::Galform,
            sim_dir: PathBuf::from("~/pso-sam/sim-output"),
            sam_dir: PathBuf::from("~/pso-sam/sam"),
            output_dir: PathBuf::from("~/pso-sam/sam-output"),
            num_boxes: 4,
            box_size: 39.6850263,
            constraints: BTreeSet::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_jobs: 100,
            wait_time: 10,
            submit: "qsub".to_owned(),
            status: "qstat".to_owned(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cluster: "geryon".to_owned(),
            obs_dir: PathBuf::from("~/pso-sam/obsdata"),
            pkfile: PathBuf::from("~/pso-sam/Power_Spec/pk_MassiveBlack2_norm.dat"),
            scripts_dir: PathBuf::from("~/pso-sam/scripts"),
        }
    }
}

/// Everything a SAM runner needs, with all paths absolute and normalized
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    pub scripts_dir: PathBuf,
    pub obs_dir: PathBuf,
    pub sim_dir: PathBuf,
    pub sam_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pkfile: PathBuf,
    pub cluster: String,
    pub box_size: f64,
    pub swarm_size: usize,
    pub num_boxes: usize,
    pub constraints: BTreeSet<Constraint>,
    pub submit: String,
    pub status: String,
}

impl PsoConfig {
    /// read the optional configuration file and lay the command line on top of it
    pub fn load(cli: Cli) -> Result<Self, ConfigErrors> {
        let mut config = match cli.config {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply(cli)?;
        config.general.cluster = config.general.cluster.to_lowercase();

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_reader(file)?)
    }

    fn apply(&mut self, cli: Cli) -> Result<(), ConfigErrors> {
        let Cli {
            swarm,
            sam,
            queue,
            general,
            ..
        } = cli;

        override_with(&mut self.swarm.size, swarm.swarm_size);
        override_with(&mut self.swarm.steps, swarm.num_steps);
        override_with(&mut self.swarm.inertia_weight, swarm.inertia_weight);
        override_with(&mut self.swarm.best_weight, swarm.best_weight);
        override_with(&mut self.swarm.global_weight, swarm.global_weight);

        override_with(&mut self.sam.flavour, sam.sam);
        override_with(&mut self.sam.sim_dir, sam.sim_dir);
        override_with(&mut self.sam.sam_dir, sam.sam_dir);
        override_with(&mut self.sam.num_boxes, sam.num_boxes);
        override_with(&mut self.sam.box_size, sam.box_size);
        override_with(&mut self.sam.output_dir, sam.output_dir_sam);
        if let Some(constraints) = sam.constraints {
            self.sam.constraints = parse_constraints(&constraints)?;
        }

        override_with(&mut self.queue.max_jobs, queue.max_jobs);
        override_with(&mut self.queue.wait_time, queue.wait_time);

        override_with(&mut self.general.cluster, general.cluster);
        override_with(&mut self.general.obs_dir, general.obs_dir);
        override_with(&mut self.general.pkfile, general.pkfile);
        override_with(&mut self.general.scripts_dir, general.scripts_dir);

        Ok(())
    }

    /// Check the whole configuration, logging every problem instead of
    /// stopping at the first one. Returns true if anything was wrong.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.queue.max_jobs == 0 {
            error!("queue.max_jobs must be at least 1, no job could ever be submitted");
            contains_error = true;
        }

        if self.swarm.size == 0 {
            error!("swarm.size must be at least 1");
            contains_error = true;
        }

        if self.sam.num_boxes == 0 {
            error!("sam.num_boxes must be at least 1");
            contains_error = true;
        }

        if self.sam.box_size.is_nan() || self.sam.box_size <= 0.0 {
            error!("sam.box_size must be positive, got {}", self.sam.box_size);
            contains_error = true;
        }

        if let Err(unsupported) = Cluster::from_str(&self.general.cluster) {
            error!("general.cluster: {unsupported}");
            contains_error = true;
        }

        if self.sam.flavour != SamFlavour::Galform {
            error!("sam.flavour: {} is not yet supported", self.sam.flavour);
            contains_error = true;
        }

        if self.sam.constraints.is_empty() {
            warn!("No constraints selected, particles will not be scored");
        }

        contains_error
    }

    pub fn throttle(&self) -> Throttle {
        Throttle {
            max_concurrent: self.queue.max_jobs,
            interval: Duration::from_secs(self.queue.wait_time),
        }
    }

    pub fn weights(&self) -> SwarmWeights {
        SwarmWeights {
            inertia: self.swarm.inertia_weight,
            best: self.swarm.best_weight,
            global: self.swarm.global_weight,
        }
    }

    pub fn runner_config(&self) -> Result<RunnerConfig, ConfigErrors> {
        Ok(RunnerConfig {
            scripts_dir: normalized(&self.general.scripts_dir)?,
            obs_dir: normalized(&self.general.obs_dir)?,
            sim_dir: normalized(&self.sam.sim_dir)?,
            sam_dir: normalized(&self.sam.sam_dir)?,
            output_dir: normalized(&self.sam.output_dir)?,
            pkfile: normalized(&self.general.pkfile)?,
            cluster: self.general.cluster.to_lowercase(),
            box_size: self.sam.box_size,
            swarm_size: self.swarm.size,
            num_boxes: self.sam.num_boxes,
            constraints: self.sam.constraints.clone(),
            submit: self.queue.submit.clone(),
            status: self.queue.status.clone(),
        })
    }
}

fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn normalized(path: &Path) -> Result<PathBuf, ConfigErrors> {
    fully_normalized(path).map_err(|source| ConfigErrors::InvalidPath {
        path: path.to_path_buf(),
        source,
    })
}
