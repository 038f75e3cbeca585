use super::{
    constraints::{Epoch, Probability},
    results::{read_catalogue, GalaxyRecord},
    template, Cluster, GenerationPhase, LiveJobs, RunnerError, SamRunner,
};
use crate::{
    config::RunnerConfig,
    executors::{CommandExecutor, JobCommand},
    queue::{OracleError, QueueOracle, StatusCommandOracle},
    scheduler::{run_jobs, Job, ScheduleReport, Sleeper, Throttle},
    util::format_exponent,
};
use ignore::WalkBuilder;
use itertools::{iproduct, Itertools};
use rayon::prelude::*;
use std::{
    cell::Cell,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// label carried by every Galform job in the queue listing
const JOB_TAG: &str = "Galform_MBII";

const OMEGA_M: f64 = 0.275;
const OMEGA_B: f64 = 0.046;
const OMEGA_L: f64 = 0.725;
const HUBBLE: f64 = 0.701;
const SIGMA8: f64 = 0.816;
const MIN_HALO_MASS: f64 = 1e10;
const SNAPSHOTS: [u32; 2] = [176, 171];
const ZOUT: [f64; 2] = [0.0, 0.1];

/// The Galform parameters calibrated by the swarm, one set per particle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationParameters {
    pub alphahot: f64,
    pub vhotdisk: f64,
    pub vhotburst: f64,
    pub alpha_cool: f64,
    pub f_smbh: f64,
    pub nu_sf: f64,
    pub stabledisk: f64,
    pub f_dyn: f64,
    pub tau_star_min: f64,
}

impl CalibrationParameters {
    fn assignments(&self) -> [(&'static str, String); 9] {
        [
            ("alphahot", self.alphahot.to_string()),
            ("vhotdisk", self.vhotdisk.to_string()),
            ("vhotburst", self.vhotburst.to_string()),
            ("alpha_cool", self.alpha_cool.to_string()),
            ("F_SMBH", self.f_smbh.to_string()),
            ("nu_sf", self.nu_sf.to_string()),
            ("stabledisk", self.stabledisk.to_string()),
            ("f_dyn", self.f_dyn.to_string()),
            ("tau_star_min", self.tau_star_min.to_string()),
        ]
    }
}

/// Runs Galform within the context of a PSO loop
pub struct GalformRunner {
    config: RunnerConfig,
    executor: Box<dyn CommandExecutor>,
    sleeper: Box<dyn Sleeper>,
    status_command: JobCommand,
    particles: Vec<CalibrationParameters>,
    phase: Cell<GenerationPhase>,
}

impl GalformRunner {
    pub fn new(
        config: RunnerConfig,
        executor: Box<dyn CommandExecutor>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            status_command: JobCommand::new(&config.status),
            particles: vec![CalibrationParameters::default(); config.swarm_size],
            config,
            executor,
            sleeper,
            phase: Cell::default(),
        }
    }

    fn transition(&self, phase: GenerationPhase) {
        debug!(from = %self.phase.get(), to = %phase, "Generation phase changed");
        self.phase.set(phase);
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        iproduct!(0..self.config.swarm_size, 0..self.config.num_boxes)
    }

    pub fn script_file(&self, particle: usize, box_index: usize) -> PathBuf {
        self.config
            .scripts_dir
            .join(format!("run_galform_{box_index:03}.N{particle}.csh"))
    }

    pub fn particle_output_dir(&self, particle: usize, box_index: usize) -> PathBuf {
        self.config
            .output_dir
            .join("Galaxies")
            .join(format!("BOX_{box_index:03}"))
            .join(particle.to_string())
    }

    pub fn catalogue_file(&self, particle: usize, box_index: usize, redshift: f64) -> PathBuf {
        self.particle_output_dir(particle, box_index)
            .join(format!("calibration_z{redshift:3.1}.cat"))
    }

    /// particle independent settings shared by every input file
    fn global_assignments(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "aquarius_tree_file",
                format!(
                    "{}/treedir_{:03}/tree_{:03}",
                    self.config.sim_dir.display(),
                    SNAPSHOTS[0],
                    SNAPSHOTS[0]
                ),
            ),
            ("PKfile", self.config.pkfile.display().to_string()),
            ("min_halo_mass", format_exponent(MIN_HALO_MASS)),
            ("omega0", OMEGA_M.to_string()),
            ("lambda0", OMEGA_L.to_string()),
            ("omegab", OMEGA_B.to_string()),
            ("h0", HUBBLE.to_string()),
            ("sigma8", SIGMA8.to_string()),
            ("volume", self.config.box_size.powi(3).to_string()),
            ("nout", ZOUT.len().to_string()),
            (
                "zout",
                format!("[{}]", ZOUT.iter().map(|z| format!("{z:.6}")).join(",")),
            ),
        ]
    }

    fn read_galaxies(
        &self,
        particle: usize,
        redshift: f64,
    ) -> Result<Vec<GalaxyRecord>, RunnerError> {
        let mut galaxies = Vec::new();

        for box_index in 0..self.config.num_boxes {
            galaxies.extend(read_catalogue(
                &self.catalogue_file(particle, box_index, redshift),
            )?);
        }

        Ok(galaxies)
    }

    fn total_volume(&self) -> f64 {
        self.config.num_boxes as f64 * self.config.box_size.powi(3)
    }
}

impl SamRunner for GalformRunner {
    fn swarm_size(&self) -> usize {
        self.config.swarm_size
    }

    fn phase(&self) -> GenerationPhase {
        self.phase.get()
    }

    #[instrument(skip_all)]
    fn prepare_inputs(&mut self) -> Result<(), RunnerError> {
        let base = template::load(&self.config.sam_dir.join("Galform.input"))?;
        let global = template::substitute_all(&base, self.global_assignments());

        fs::create_dir_all(&self.config.scripts_dir).map_err(|source| {
            template::TemplateError::Write {
                path: self.config.scripts_dir.clone(),
                source,
            }
        })?;

        // every file is independent of the others
        let particles = &self.particles;
        let scripts_dir = &self.config.scripts_dir;
        self.pairs()
            .collect_vec()
            .into_par_iter()
            .try_for_each(|(particle, box_index)| {
                let config =
                    template::substitute_all(&global, particles[particle].assignments());

                template::store(&input_file(scripts_dir, particle, box_index), &config)
            })?;

        info!(
            files = self.config.swarm_size * self.config.num_boxes,
            "Prepared Galform inputs"
        );
        self.transition(GenerationPhase::InputsPrepared);

        Ok(())
    }

    fn build_commands(&self) -> Result<Vec<Job>, RunnerError> {
        let cluster = Cluster::from_str(&self.config.cluster)?;

        Ok(self
            .pairs()
            .map(|(particle, box_index)| Job {
                label: format!("BOX_{box_index:03}/N{particle}"),
                command: cluster
                    .submit_command(&self.config.submit, &self.script_file(particle, box_index)),
            })
            .collect())
    }

    fn count_live_jobs(&self) -> Result<usize, OracleError> {
        StatusCommandOracle::new(self.executor.as_ref(), &self.status_command, JOB_TAG)
            .count_live_jobs()
    }

    fn run(&mut self, throttle: Throttle) -> Result<ScheduleReport, RunnerError> {
        let phase = self.phase.get();
        if !phase.is_settled() {
            return Err(RunnerError::GenerationInProgress(phase));
        }

        // commands first: an unknown cluster must fail before anything is written
        let jobs = self.build_commands()?;
        self.prepare_inputs()?;

        self.transition(GenerationPhase::Submitting);
        let report = run_jobs(
            jobs,
            throttle,
            self.executor.as_ref(),
            &LiveJobs(&*self),
            self.sleeper.as_ref(),
            &|| self.transition(GenerationPhase::Draining),
        )?;

        self.transition(GenerationPhase::ResultsAvailable);

        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                "Some jobs could not be submitted, scoring their particles will fail and abort the run"
            );
        }

        Ok(report)
    }

    fn get_probabilities(&self, particle: usize) -> Result<Vec<Probability>, RunnerError> {
        if particle >= self.config.swarm_size {
            return Err(RunnerError::ParticleOutOfRange {
                index: particle,
                swarm_size: self.config.swarm_size,
            });
        }

        let first = self.read_galaxies(particle, ZOUT[0])?;
        let second = self.read_galaxies(particle, ZOUT[1])?;

        let mut probabilities = Vec::new();
        for constraint in self.config.constraints.iter() {
            let galaxies = match constraint.epoch() {
                Epoch::First => &first,
                Epoch::Second => &second,
            };

            if let Some(probability) =
                constraint.score(galaxies, &self.config.obs_dir, self.total_volume())?
            {
                probabilities.push(probability);
            }
        }

        debug!(particle, scores = probabilities.len(), "Computed probabilities");

        Ok(probabilities)
    }

    fn remove_generated_files(&mut self) -> Result<(), RunnerError> {
        // collect all file names first
        let files = self
            .pairs()
            .map(|(particle, box_index)| self.particle_output_dir(particle, box_index))
            .filter(|dir| dir.is_dir())
            .flat_map(|dir| files_in(&dir))
            .collect_vec();

        for file in files.iter() {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    debug!(path = ?file, "Already removed");
                }
                Err(source) => {
                    return Err(RunnerError::Cleanup {
                        path: file.clone(),
                        source,
                    })
                }
            }
        }

        info!(removed = files.len(), "Removed generated files");
        self.transition(GenerationPhase::Cleaned);

        Ok(())
    }
}

fn input_file(scripts_dir: &Path, particle: usize, box_index: usize) -> PathBuf {
    scripts_dir.join(format!("Galform_{box_index:03}.N{particle}.input"))
}

/// non hidden regular files directly inside `dir`
fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(dir);
    builder.standard_filters(false).hidden(true).max_depth(Some(1));

    builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to list generated files: {e}");
                None
            }
        })
        .filter(|entry| entry.depth() == 1)
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
        .map(|entry| entry.into_path())
        .collect()
}
