use crate::{
    config::ConfigErrors,
    sam::{constraints::Probability, RunnerError, SamRunner},
    scheduler::{ScheduleReport, Throttle},
};
use thiserror::Error;
use tracing::{info, info_span};

#[derive(Error, Debug)]
pub enum PsoError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Scaling factors of the velocity update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwarmWeights {
    pub inertia: f64,
    pub best: f64,
    pub global: f64,
}

/// What one generation produced
#[derive(Debug)]
pub struct GenerationResult {
    pub step: usize,
    pub report: ScheduleReport,
    /// scores indexed by particle
    pub probabilities: Vec<Vec<Probability>>,
}

impl GenerationResult {
    /// Particle with the highest joint probability of all its scores.
    ///
    /// Particles without any score are not candidates.
    pub fn best_particle(&self) -> Option<(usize, f64)> {
        self.probabilities
            .iter()
            .enumerate()
            .filter(|(_, scores)| !scores.is_empty())
            .map(|(particle, scores)| {
                (
                    particle,
                    scores.iter().map(|probability| probability.value).product::<f64>(),
                )
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
    }
}

/// Run `steps` generations: execute the model for the whole swarm, score
/// every particle, then leave a clean slate for the next round.
pub fn run_pso<R: SamRunner + ?Sized>(
    runner: &mut R,
    steps: usize,
    throttle: Throttle,
) -> Result<Vec<GenerationResult>, RunnerError> {
    let mut generations = Vec::with_capacity(steps);

    for step in 0..steps {
        let _span = info_span!("pso_step", step = step + 1).entered();
        info!("Starting PSO step {}/{}", step + 1, steps);

        // send the model to the queue and wait for all of its tasks to finish
        let report = runner.run(throttle)?;

        let probabilities = (0..runner.swarm_size())
            .map(|particle| runner.get_probabilities(particle))
            .collect::<Result<Vec<_>, _>>()?;

        for (particle, scores) in probabilities.iter().enumerate() {
            info!(
                particle,
                scores = ?scores
                    .iter()
                    .map(|probability| {
                        (probability.constraint.name(), probability.value, probability.bins)
                    })
                    .collect::<Vec<_>>(),
                "Particle evaluated"
            );
        }

        // TODO: turn the probabilities into particle velocities and positions
        runner.remove_generated_files()?;

        generations.push(GenerationResult {
            step,
            report,
            probabilities,
        });
    }

    Ok(generations)
}

#[cfg(test)]
mod tests {
    use super::{run_pso, GenerationResult};
    use crate::{
        queue::OracleError,
        sam::{
            constraints::{Constraint, Probability},
            GenerationPhase, RunnerError, SamRunner,
        },
        scheduler::{Job, ScheduleReport, Throttle},
    };
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Call {
        Run,
        Remove,
    }

    #[derive(Default)]
    struct ScriptedRunner {
        calls: Vec<Call>,
        fail_on_run: Option<usize>,
    }

    impl SamRunner for ScriptedRunner {
        fn swarm_size(&self) -> usize {
            3
        }

        fn phase(&self) -> GenerationPhase {
            GenerationPhase::Idle
        }

        fn prepare_inputs(&mut self) -> Result<(), RunnerError> {
            Ok(())
        }

        fn build_commands(&self) -> Result<Vec<Job>, RunnerError> {
            Ok(Vec::new())
        }

        fn count_live_jobs(&self) -> Result<usize, OracleError> {
            Ok(0)
        }

        fn run(&mut self, _throttle: Throttle) -> Result<ScheduleReport, RunnerError> {
            let runs = self.calls.iter().filter(|call| **call == Call::Run).count();
            self.calls.push(Call::Run);

            if self.fail_on_run == Some(runs) {
                return Err(RunnerError::GenerationInProgress(GenerationPhase::Draining));
            }

            Ok(ScheduleReport::default())
        }

        fn get_probabilities(&self, particle: usize) -> Result<Vec<Probability>, RunnerError> {
            Ok(vec![Probability {
                constraint: Constraint::StMassfunc,
                value: particle as f64 / 10.0,
                bins: 1,
            }])
        }

        fn remove_generated_files(&mut self) -> Result<(), RunnerError> {
            self.calls.push(Call::Remove);
            Ok(())
        }
    }

    fn throttle() -> Throttle {
        Throttle {
            max_concurrent: 1,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn generations_are_strictly_sequential() {
        let mut runner = ScriptedRunner::default();

        let generations = run_pso(&mut runner, 2, throttle()).unwrap();

        assert_eq!(
            runner.calls,
            vec![Call::Run, Call::Remove, Call::Run, Call::Remove]
        );
        assert_eq!(generations.len(), 2);
        assert_eq!(generations[1].step, 1);
        assert_eq!(generations[0].probabilities.len(), 3);
        assert_eq!(generations[0].probabilities[2][0].value, 0.2);
    }

    #[test]
    fn a_failed_generation_stops_the_loop() {
        let mut runner = ScriptedRunner {
            fail_on_run: Some(1),
            ..ScriptedRunner::default()
        };

        assert!(run_pso(&mut runner, 5, throttle()).is_err());
        assert_eq!(runner.calls, vec![Call::Run, Call::Remove, Call::Run]);
    }

    fn score(constraint: Constraint, value: f64) -> Probability {
        Probability {
            constraint,
            value,
            bins: 1,
        }
    }

    #[test]
    fn best_particle_maximizes_the_joint_probability() {
        let generation = GenerationResult {
            step: 0,
            report: ScheduleReport::default(),
            probabilities: vec![
                vec![score(Constraint::BhBulge, 0.9), score(Constraint::StMassfunc, 0.5)],
                Vec::new(),
                vec![score(Constraint::BhBulge, 0.7), score(Constraint::StMassfunc, 0.7)],
            ],
        };

        let (particle, joint) = generation.best_particle().unwrap();
        assert_eq!(particle, 2);
        assert!((joint - 0.49).abs() < 1e-12);
    }

    #[test]
    fn unscored_generation_has_no_best_particle() {
        let generation = GenerationResult {
            step: 0,
            report: ScheduleReport::default(),
            probabilities: vec![Vec::new(); 3],
        };

        assert_eq!(generation.best_particle(), None);
    }

    #[test]
    fn zero_steps_do_nothing() {
        let mut runner = ScriptedRunner::default();

        assert!(run_pso(&mut runner, 0, throttle()).unwrap().is_empty());
        assert!(runner.calls.is_empty());
    }
}
