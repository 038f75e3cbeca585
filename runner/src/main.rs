mod config;
mod executors;
mod pso;
mod queue;
mod sam;
mod scheduler;
#[cfg(test)]
mod testing;
mod util;

use clap::Parser;
use config::{Cli, ConfigErrors, PsoConfig};
use executors::SystemExecutor;
use pso::{run_pso, PsoError};
use sam::{SamRunner, SamRunners};
use scheduler::ThreadSleeper;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), PsoError> {
    let config = PsoConfig::load(cli)?;

    if config.preflight_checks() {
        return Err(ConfigErrors::PreflightFailed.into());
    }

    let weights = config.weights();
    info!(
        swarm_size = config.swarm.size,
        steps = config.swarm.steps,
        inertia = weights.inertia,
        best = weights.best,
        global = weights.global,
        "Starting PSO for {}",
        config.sam.flavour
    );

    let mut runner = SamRunners::load(
        config.sam.flavour,
        config.runner_config()?,
        Box::new(SystemExecutor),
        Box::new(ThreadSleeper),
    )?;

    let generations = run_pso(&mut runner, config.swarm.steps, config.throttle()).map_err(|e| {
        error!(phase = %runner.phase(), "PSO aborted");
        e
    })?;

    for generation in generations.iter() {
        match generation.best_particle() {
            Some((particle, joint)) => info!(
                step = generation.step + 1,
                particle,
                joint,
                submitted = generation.report.submitted,
                failed = generation.report.failed.len(),
                "Best particle of generation"
            ),
            None => info!(step = generation.step + 1, "No particle could be scored"),
        }
    }
    info!(generations = generations.len(), "PSO finished");

    Ok(())
}
