//! CFR with the regret table replaced by a fitted regressor.
//!
//! Every iteration samples trajectories against the current model, streams their regret
//! observations through a reservoir and refits the model every `refit_interval`
//! iterations.

pub mod buffer;
pub mod model;
pub mod sampler;

use std::{
    collections::BTreeMap,
    time::{
        Duration,
        Instant,
    },
};

use log::{
    debug,
    info,
    warn,
};
use more_asserts::assert_gt;
use rayon::{
    ThreadPool,
    ThreadPoolBuilder,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::SolverError,
    eval::{
        compute_exploitability,
        Strategy,
    },
    games::InformationEncoder,
    navigator::{
        HistoryPoint,
        Navigator,
    },
    pipeline::{
        CancellationToken,
        Pipeline,
    },
    policy::UpdateRuleKind,
    pool::pool,
    solvers::{
        RunSummary,
        Solver,
        SolverOptions,
        TraversalMode,
    },
};
use buffer::{
    Observation,
    ObservationBuffer,
};
use model::{
    DeepModel,
    LinearRegressor,
    RegretRegressor,
};
use sampler::{
    DeepProgress,
    DeepWalker,
};

/// The state a deep run needs to continue exactly as if it had never stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "R: RegretRegressor")]
pub struct DeepCheckpoint<R: RegretRegressor = LinearRegressor> {
    pub model: DeepModel<R>,
    pub buffer: ObservationBuffer,
    /// Completed iterations.
    pub iteration: usize,
}

pub struct DeepTrainer<G: InformationEncoder, R: RegretRegressor = LinearRegressor> {
    navigator: Navigator<G>,
    model: DeepModel<R>,
    buffer: ObservationBuffer,
    iteration: usize,
    workers: Option<ThreadPool>,
    cancel: CancellationToken,
}

impl<G: InformationEncoder> DeepTrainer<G, LinearRegressor> {
    /// Linear model with the ridge, reservoir capacity and seed of `options`.
    pub fn new(game: G, options: &SolverOptions) -> Self {
        Self::with_regressor(game, LinearRegressor::new(options.ridge), options)
    }
}

impl<G: InformationEncoder, R: RegretRegressor> DeepTrainer<G, R> {
    pub fn with_regressor(game: G, regressor: R, options: &SolverOptions) -> Self {
        DeepTrainer {
            navigator: Navigator::new(game),
            model: DeepModel::new(regressor),
            buffer: ObservationBuffer::new(options.observation_capacity, options.seed),
            iteration: 0,
            workers: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Resumes a run from [`DeepTrainer::checkpoint`]. The exploration floor, sampling
    /// seeds and observation weights pick up at `checkpoint.iteration`.
    pub fn restore(game: G, checkpoint: DeepCheckpoint<R>) -> Self {
        DeepTrainer {
            navigator: Navigator::new(game),
            model: checkpoint.model,
            buffer: checkpoint.buffer,
            iteration: checkpoint.iteration,
            workers: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn checkpoint(&self) -> DeepCheckpoint<R> {
        DeepCheckpoint {
            model: self.model.clone(),
            buffer: self.buffer.clone(),
            iteration: self.iteration,
        }
    }

    pub fn model(&self) -> &DeepModel<R> {
        &self.model
    }

    pub fn navigator(&self) -> &Navigator<G> {
        &self.navigator
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The observations currently held by the reservoir.
    pub fn export_observations(&self) -> Vec<Observation> {
        self.buffer.observations().to_vec()
    }

    pub fn exploitability(&self) -> Result<f64, SolverError> {
        compute_exploitability(&self.navigator, self)
    }

    fn ensure_workers(&mut self, options: &SolverOptions) {
        if !options.parallel || self.workers.is_some() {
            return;
        }
        match ThreadPoolBuilder::new().num_threads(options.threads).build() {
            Ok(workers) => {
                debug!("trajectory workers: {}", workers.current_num_threads());
                self.workers = Some(workers);
            }
            Err(err) => warn!("failed to build trajectory workers: {}", err),
        }
    }

    /// Samples the iteration's trajectories and feeds their observations to the
    /// reservoir in trajectory order. Returns mean root utilities and the failure count.
    fn run_one_iteration(
        &mut self,
        options: &SolverOptions,
    ) -> Result<(Vec<f64>, usize), SolverError> {
        let num_players = self.navigator.game_ref().num_players();
        let trajectories = match options.traversal {
            TraversalMode::FullTree => num_players,
            TraversalMode::Sampled {
                trajectories,
            } => trajectories.max(1),
        };
        let (navigator, model, iteration) = (&self.navigator, &self.model, self.iteration);
        let buffer = &mut self.buffer;

        let produce = |variation: usize| -> Result<DeepProgress, SolverError> {
            let mut progress = pool::<DeepProgress>().acquire();
            match DeepWalker::new(navigator, model, iteration, variation).walk(&mut progress) {
                Ok(_) => Ok(progress),
                Err(err) => {
                    pool::<DeepProgress>().release(progress);
                    Err(err)
                }
            }
        };

        let mut values = vec![0.0; num_players];
        let mut counts = vec![0usize; num_players];
        let mut failures = 0;
        let consume = |variation: usize, result: Result<DeepProgress, SolverError>| {
            match result {
                Ok(mut progress) => {
                    buffer.extend(progress.observations.drain(..));
                    values[variation % num_players] += progress.value;
                    counts[variation % num_players] += 1;
                    pool::<DeepProgress>().release(progress);
                    Ok(())
                }
                Err(err) if err.is_trajectory_local() => {
                    warn!("iteration {} trajectory {} failed: {}", iteration, variation, err);
                    failures += 1;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        let pipeline = Pipeline::new(produce, consume, |i| i >= trajectories)
            .with_max_in_flight(options.max_in_flight);
        match (&self.workers, options.parallel) {
            (Some(workers), true) => pipeline.with_workers(workers).run(true)?,
            _ => pipeline.run(false)?,
        };

        if failures == trajectories {
            return Err(SolverError::AllTrajectoriesFailed {
                iteration,
                failures,
            });
        }
        for (value, count) in values.iter_mut().zip(counts) {
            if count > 0 {
                *value /= count as f64;
            }
        }
        Ok((values, failures))
    }

    /// Action count of every information set the navigator has materialized.
    fn known_decisions(&self) -> BTreeMap<(usize, G::InfoSet), usize> {
        let mut decisions = BTreeMap::new();
        for point in self.navigator.cached_decisions() {
            if let HistoryPoint::Decision(node) = &*point {
                decisions.insert((node.player, node.info_set.clone()), node.actions.len());
            }
        }
        decisions
    }

    fn query(
        &self,
        player: usize,
        info_set: &G::InfoSet,
        actions_len: usize,
    ) -> Result<Vec<f64>, SolverError> {
        let game = self.navigator.game_ref();
        let encoding = game.encode(info_set);
        self.model.query(player, game.decision_index(info_set), &encoding, actions_len, None)
    }

    pub fn print_policies(&self) {
        info!("Policies (generation {}) [", self.model.generation());
        for ((player, info_set), actions_len) in self.known_decisions() {
            match self.query(player, &info_set, actions_len) {
                Ok(policy) => info!("    {}: {:?}", info_set, policy),
                Err(err) => info!("    {}: {}", info_set, err),
            }
        }
        info!("]");
        info!("# of observations: {} of {} seen", self.buffer.len(), self.buffer.seen());
    }
}

impl<G: InformationEncoder, R: RegretRegressor> Strategy<G> for DeepTrainer<G, R> {
    /// The model's current policy; untrained decisions are uniform.
    fn get_strategy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        let actions_len = self.navigator.cached_decisions().iter().find_map(|point| match &**point {
            HistoryPoint::Decision(node) if node.player == player && node.info_set == *info_set => {
                Some(node.actions.len())
            }
            _ => None,
        })?;
        self.query(player, info_set, actions_len).ok()
    }

    fn safe_get_strategy(
        &self,
        player: usize,
        actions_len: usize,
        info_set: &G::InfoSet,
    ) -> Vec<f64> {
        self.query(player, info_set, actions_len)
            .unwrap_or_else(|_| vec![1.0 / actions_len as f64; actions_len])
    }
}

impl<G: InformationEncoder, R: RegretRegressor> Solver<G> for DeepTrainer<G, R> {
    fn game_ref(&self) -> &G {
        self.navigator.game_ref()
    }

    fn run_iterations(
        &mut self,
        count: usize,
        options: &SolverOptions,
    ) -> Result<RunSummary, SolverError> {
        let num_players = self.navigator.game_ref().num_players();
        assert_gt!(num_players, 0);
        self.ensure_workers(options);
        if options.prefer_accelerated {
            info!("the accelerated backend only serves the tabular solver; sampling on the CPU");
        }
        if options.update_rule != UpdateRuleKind::RegretMatching {
            info!("{:?} is not used by the deep solver", options.update_rule);
        }
        let refit_interval = options.refit_interval.max(1);

        let mut summary = RunSummary {
            mean_utilities: vec![0.0; num_players],
            backend: "cpu".to_string(),
            ..Default::default()
        };
        let start = Instant::now();
        let mut timer = Instant::now();
        for _ in 0..count {
            if self.cancel.is_cancelled() {
                info!("cancelled after {} iterations", self.iteration);
                summary.cancelled = true;
                break;
            }
            self.model.set_epsilon(options.perturbation.epsilon(self.iteration));
            let (values, failures) = self.run_one_iteration(options)?;
            self.iteration += 1;
            if self.iteration % refit_interval == 0 {
                self.model.refit(self.buffer.observations())?;
                debug!(
                    "refit on {} observations, generation {}",
                    self.buffer.len(),
                    self.model.generation()
                );
            }

            summary.iterations += 1;
            summary.failed_trajectories.push(failures);
            for (mean, value) in summary.mean_utilities.iter_mut().zip(values) {
                *mean += value;
            }

            if timer.elapsed() > Duration::from_secs(5) {
                info!(
                    "epoch {:10}: generation {}, {} observations",
                    self.iteration,
                    self.model.generation(),
                    self.buffer.len()
                );
                timer = Instant::now();
            }
        }
        if summary.iterations > 0 {
            for mean in &mut summary.mean_utilities {
                *mean /= summary.iterations as f64;
            }
        }
        summary.elapsed = start.elapsed();
        debug!("{}", summary);
        Ok(summary)
    }

    fn current_policy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        self.get_strategy(player, info_set)
    }

    fn print_strategy(&self) {
        self.print_policies();
    }
}
