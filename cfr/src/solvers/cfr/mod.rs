pub mod node;
pub mod store;
pub mod trajectory;

use std::time::{
    Duration,
    Instant,
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

use crate::{
    backend::{
        probe_backend,
        TraversalBackend,
    },
    error::SolverError,
    eval::{
        compute_exploitability,
        Strategy,
    },
    games::GameDefinition,
    navigator::Navigator,
    pipeline::{
        CancellationToken,
        Pipeline,
    },
    pool::pool,
    solvers::{
        RunSummary,
        Solver,
        SolverOptions,
        TraversalMode,
    },
};
use store::{
    InformationSetStore,
    StoreSnapshot,
};
use trajectory::{
    trajectory_rng,
    TrajectoryProgress,
    Walker,
};

type Progress<G> = TrajectoryProgress<<G as GameDefinition>::InfoSet>;

struct IterationOutcome {
    values: Vec<f64>,
    failures: usize,
}

/// Tabular CFR over an explicit information-set store.
pub struct Trainer<G: GameDefinition> {
    navigator: Navigator<G>,
    store: InformationSetStore<G::InfoSet>,
    iteration: usize,
    backend: Option<Box<dyn TraversalBackend<G>>>,
    workers: Option<ThreadPool>,
    cancel: CancellationToken,
}

impl<G: GameDefinition> Trainer<G> {
    pub fn new(game: G) -> Self {
        Self::with_store(game, InformationSetStore::new())
    }

    fn with_store(game: G, store: InformationSetStore<G::InfoSet>) -> Self {
        Trainer {
            navigator: Navigator::new(game),
            store,
            iteration: 0,
            backend: None,
            workers: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Resumes from a snapshot taken after `iteration` completed iterations.
    pub fn restore(game: G, snapshot: StoreSnapshot<G::InfoSet>, iteration: usize) -> Self {
        let mut trainer = Self::with_store(game, InformationSetStore::restore(snapshot));
        trainer.iteration = iteration;
        trainer
    }

    pub fn snapshot(&self) -> StoreSnapshot<G::InfoSet> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &InformationSetStore<G::InfoSet> {
        &self.store
    }

    pub fn navigator(&self) -> &Navigator<G> {
        &self.navigator
    }

    /// Completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn average_policy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        self.store.average_policy(player, info_set)
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

    fn ensure_backend(&mut self, options: &SolverOptions) {
        if options.prefer_accelerated && self.backend.is_none() {
            self.backend = Some(probe_backend(&self.navigator, options.max_accelerated_nodes));
        }
    }

    fn run_accelerated(&mut self) -> Result<Option<IterationOutcome>, SolverError> {
        let backend = match self.backend.as_mut() {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let result = backend
            .initialize_iteration(self.iteration, &self.store)
            .and_then(|ctx| backend.traverse(&ctx))
            .and_then(|values| backend.flush_into_store(&self.store).map(|_| values));
        match result {
            Ok(values) => Ok(Some(IterationOutcome {
                values,
                failures: 0,
            })),
            Err(SolverError::BackendUnavailable(reason)) => {
                debug!("iteration {} falls back to the CPU path: {}", self.iteration, reason);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run_cpu(&self, options: &SolverOptions) -> Result<IterationOutcome, SolverError> {
        let num_players = self.navigator.game_ref().num_players();
        let trajectories = match options.traversal {
            TraversalMode::FullTree => num_players,
            TraversalMode::Sampled {
                trajectories,
            } => trajectories.max(1),
        };
        let (navigator, store) = (&self.navigator, &self.store);
        let (iteration, seed, traversal) = (self.iteration, options.seed, options.traversal);

        let produce = |variation: usize| -> Result<Progress<G>, SolverError> {
            let walker = Walker::new(navigator, store, variation % num_players);
            let mut progress = pool::<Progress<G>>().acquire();
            let result = match traversal {
                TraversalMode::FullTree => walker.full_tree(&mut progress),
                TraversalMode::Sampled {
                    ..
                } => {
                    let mut rng = trajectory_rng(seed, iteration, variation);
                    walker.sampled(&mut progress, &mut rng)
                }
            };
            match result {
                Ok(_) => Ok(progress),
                Err(err) => {
                    pool::<Progress<G>>().release(progress);
                    Err(err)
                }
            }
        };

        let mut values = vec![0.0; num_players];
        let mut counts = vec![0usize; num_players];
        let mut failures = 0;
        let consume = |variation: usize, result: Result<Progress<G>, SolverError>| {
            match result {
                Ok(mut progress) => {
                    progress.apply();
                    values[variation % num_players] += progress.value;
                    counts[variation % num_players] += 1;
                    pool::<Progress<G>>().release(progress);
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
        Ok(IterationOutcome {
            values,
            failures,
        })
    }

    fn run_one_iteration(
        &mut self,
        options: &SolverOptions,
    ) -> Result<IterationOutcome, SolverError> {
        let accelerated = if options.traversal == TraversalMode::FullTree {
            self.run_accelerated()?
        } else {
            None
        };
        let outcome = match accelerated {
            Some(outcome) => outcome,
            None => self.run_cpu(options)?,
        };
        Ok(outcome)
    }

    pub fn print_nodes(&self) {
        info!("Nodes [");
        for node in self.store.nodes() {
            info!("    {}", node.read());
        }
        info!("]");
        info!("# of infoset: {}", self.store.len());
    }
}

impl<G: GameDefinition> Strategy<G> for Trainer<G> {
    fn get_strategy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        self.store.average_policy(player, info_set)
    }
}

impl<G: GameDefinition> Solver<G> for Trainer<G> {
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
        self.ensure_backend(options);
        if options.prefer_accelerated && options.traversal != TraversalMode::FullTree {
            info!("the accelerated backend only walks the full tree; sampling on the CPU");
        }

        let mut rule = options.update_rule.build();
        let mut summary = RunSummary {
            mean_utilities: vec![0.0; num_players],
            backend: match &self.backend {
                Some(backend) if backend.is_available() => backend.name().to_string(),
                _ => "cpu".to_string(),
            },
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
            rule.prepare(self.iteration, &options.perturbation);
            let outcome = self.run_one_iteration(options)?;
            summary.updated_nodes +=
                self.store.update_all(rule.as_ref(), options.weight_by_inverse_reach)?;
            self.iteration += 1;

            summary.iterations += 1;
            summary.failed_trajectories.push(outcome.failures);
            for (mean, value) in summary.mean_utilities.iter_mut().zip(outcome.values) {
                *mean += value;
            }

            if timer.elapsed() > Duration::from_secs(5) {
                match self.exploitability() {
                    Ok(exploitability) => {
                        info!("epoch {:10}: exploitability: {}", self.iteration, exploitability)
                    }
                    Err(err) => {
                        info!("epoch {:10}: exploitability unavailable: {}", self.iteration, err)
                    }
                }
                timer = Instant::now();
            }
        }
        if summary.iterations > 0 {
            for mean in &mut summary.mean_utilities {
                *mean /= summary.iterations as f64;
            }
        }
        summary.elapsed = start.elapsed();
        debug!("{} ({})", summary, rule.name());
        Ok(summary)
    }

    fn current_policy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        self.store.current_policy(player, info_set)
    }

    fn print_strategy(&self) {
        self.print_nodes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::GameDefinitionError,
        games::{
            kuhn::Kuhn,
            matrix::{
                MatrixGame,
                MatrixInfoSet,
            },
        },
        policy::UpdateRuleKind,
    };

    fn policy_of(trainer: &Trainer<MatrixGame>, player: usize) -> Vec<f64> {
        trainer
            .current_policy(
                player,
                &MatrixInfoSet {
                    player,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_first_iteration_follows_regret() {
        let mut trainer = Trainer::new(MatrixGame::coordination());
        let summary = trainer.run_iterations(1, &SolverOptions::default()).unwrap();
        assert_eq!(1, summary.iterations);
        assert_eq!(vec![0], summary.failed_trajectories);
        assert_eq!(vec![3.0, 3.0], summary.mean_utilities);
        assert_eq!(2, summary.updated_nodes);
        // only action 1 has positive regret at either node
        assert_eq!(vec![1.0, 0.0], policy_of(&trainer, 0));
        assert_eq!(vec![1.0, 0.0], policy_of(&trainer, 1));
        assert_eq!(1, trainer.iteration());
    }

    #[test]
    fn test_kuhn_converges() {
        let mut trainer = Trainer::new(Kuhn);
        let options = SolverOptions {
            update_rule: UpdateRuleKind::RegretMatchingPlus,
            ..Default::default()
        };
        trainer.run_iterations(500, &options).unwrap();
        assert_eq!(12, trainer.store().len());
        let exploitability = trainer.exploitability().unwrap();
        assert!(exploitability < 0.05, "exploitability {}", exploitability);
    }

    #[test]
    fn test_cancellation_stops_between_iterations() {
        let mut trainer = Trainer::new(Kuhn);
        trainer.cancellation_token().cancel();
        let summary = trainer.run_iterations(10, &SolverOptions::default()).unwrap();
        assert!(summary.cancelled);
        assert_eq!(0, summary.iterations);
        assert_eq!(0, trainer.iteration());
    }

    /// Kuhn whose dealer fails on `deal`, or on every deal when `deal` is 0.
    #[derive(Debug, Clone, Copy, Default)]
    struct BrokenDeal {
        deal: u8,
    }

    impl GameDefinition for BrokenDeal {
        type State = <Kuhn as GameDefinition>::State;
        type InfoSet = <Kuhn as GameDefinition>::InfoSet;

        fn num_players(&self) -> usize {
            2
        }

        fn initial_state(&self) -> Self::State {
            Kuhn.initial_state()
        }

        fn node_player_id(&self, state: &Self::State) -> crate::games::PlayerId {
            Kuhn.node_player_id(state)
        }

        fn is_terminal(&self, state: &Self::State) -> bool {
            Kuhn.is_terminal(state)
        }

        fn legal_actions(&self, state: &Self::State) -> Vec<crate::games::ActionId> {
            Kuhn.legal_actions(state)
        }

        fn chance_actions(&self, state: &Self::State) -> Vec<(crate::games::ActionId, f64)> {
            Kuhn.chance_actions(state)
        }

        fn advance(
            &self,
            state: &Self::State,
            action: crate::games::ActionId,
        ) -> Result<Self::State, GameDefinitionError> {
            if state.cards.is_none() && (self.deal == 0 || action == self.deal) {
                return Err(GameDefinitionError::new(&[], "dealer dropped the cards"));
            }
            Kuhn.advance(state, action)
        }

        fn utilities(&self, state: &Self::State) -> Vec<f64> {
            Kuhn.utilities(state)
        }

        fn information_set_key(&self, state: &Self::State, player: usize) -> Self::InfoSet {
            Kuhn.information_set_key(state, player)
        }
    }

    #[test]
    fn test_failed_trajectories_are_counted() {
        let mut trainer = Trainer::new(BrokenDeal {
            deal: 2,
        });
        let options = SolverOptions {
            traversal: TraversalMode::Sampled {
                trajectories: 64,
            },
            ..Default::default()
        };
        let summary = trainer.run_iterations(3, &options).unwrap();
        assert_eq!(3, summary.failed_trajectories.len());
        // one deal in six fails
        assert!(summary.total_failures() > 0);
        assert!(summary.total_failures() < 3 * 64);
    }

    #[test]
    fn test_all_failed_is_fatal() {
        let mut trainer = Trainer::new(BrokenDeal {
            deal: 0,
        });
        let err = trainer.run_iterations(1, &SolverOptions::default()).unwrap_err();
        assert_eq!(
            SolverError::AllTrajectoriesFailed {
                iteration: 0,
                failures: 2
            },
            err
        );
    }
}
