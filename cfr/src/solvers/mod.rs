use std::{
    fmt::Display,
    time::Duration,
};

use clap::Args;

use crate::{
    backend::DEFAULT_MAX_NODES,
    error::SolverError,
    eval::Strategy,
    games::GameDefinition,
    pipeline::DEFAULT_MAX_IN_FLIGHT,
    policy::{
        PerturbationSchedule,
        UpdateRuleKind,
    },
};

pub mod cfr;
pub mod deep;

/// How trajectories walk the tree within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    /// One pass per player over the whole tree.
    FullTree,
    /// `trajectories` sampled passes; trajectory `v` traverses for player
    /// `v % num_players`.
    Sampled {
        trajectories: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub update_rule: UpdateRuleKind,
    pub perturbation: PerturbationSchedule,
    pub parallel: bool,
    pub prefer_accelerated: bool,
    pub traversal: TraversalMode,
    pub weight_by_inverse_reach: bool,
    pub seed: u64,
    /// Worker threads for trajectory production; 0 lets rayon decide.
    pub threads: usize,
    pub max_in_flight: usize,
    pub max_accelerated_nodes: usize,
    pub observation_capacity: usize,
    pub refit_interval: usize,
    pub ridge: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            update_rule: UpdateRuleKind::RegretMatching,
            perturbation: PerturbationSchedule::None,
            parallel: false,
            prefer_accelerated: false,
            traversal: TraversalMode::FullTree,
            weight_by_inverse_reach: false,
            seed: 42,
            threads: 0,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_accelerated_nodes: DEFAULT_MAX_NODES,
            observation_capacity: 100_000,
            refit_interval: 10,
            ridge: 1e-3,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    #[clap(long, short, value_parser, default_value_t = 1000)]
    pub iterations: usize,

    #[clap(long, short, value_parser, default_value_t = 42)]
    pub seed: u64,

    #[clap(long, value_enum, default_value_t = UpdateRuleKind::RegretMatching)]
    pub update_rule: UpdateRuleKind,

    /// Exploration floor. Annealed towards `--epsilon-end` when both anneal flags are set.
    #[clap(long, value_parser, default_value_t = 0.0)]
    pub epsilon: f64,

    #[clap(long, value_parser)]
    pub epsilon_end: Option<f64>,

    #[clap(long, value_parser, default_value_t = 0)]
    pub anneal_iterations: usize,

    #[clap(long)]
    pub parallel: bool,

    #[clap(long, value_parser, default_value_t = 0)]
    pub threads: usize,

    #[clap(long)]
    pub accelerated: bool,

    /// Sample this many trajectories per iteration instead of walking the full tree.
    #[clap(long, value_parser)]
    pub trajectories: Option<usize>,

    #[clap(long)]
    pub weight_by_inverse_reach: bool,

    #[clap(long, value_parser, default_value_t = 100_000)]
    pub observation_capacity: usize,

    #[clap(long, value_parser, default_value_t = 10)]
    pub refit_interval: usize,

    #[clap(long, value_parser, default_value_t = 1e-3)]
    pub ridge: f64,
}

impl SolverArgs {
    pub fn to_options(&self) -> SolverOptions {
        let perturbation = match self.epsilon_end {
            Some(end) if self.anneal_iterations > 0 => PerturbationSchedule::Annealed {
                start: self.epsilon,
                end,
                iterations: self.anneal_iterations,
            },
            _ if self.epsilon > 0.0 => PerturbationSchedule::Constant(self.epsilon),
            _ => PerturbationSchedule::None,
        };
        let traversal = match self.trajectories {
            Some(trajectories) => TraversalMode::Sampled {
                trajectories,
            },
            None => TraversalMode::FullTree,
        };
        SolverOptions {
            update_rule: self.update_rule,
            perturbation,
            parallel: self.parallel,
            prefer_accelerated: self.accelerated,
            traversal,
            weight_by_inverse_reach: self.weight_by_inverse_reach,
            seed: self.seed,
            threads: self.threads,
            observation_capacity: self.observation_capacity,
            refit_interval: self.refit_interval,
            ridge: self.ridge,
            ..Default::default()
        }
    }
}

/// What a call to [`Solver::run_iterations`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub iterations: usize,
    /// Failed trajectories, one entry per completed iteration.
    pub failed_trajectories: Vec<usize>,
    /// Root utility per player, averaged over the iterations of this call.
    pub mean_utilities: Vec<f64>,
    pub updated_nodes: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub backend: String,
}

impl RunSummary {
    pub fn total_failures(&self) -> usize {
        self.failed_trajectories.iter().sum()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} iterations in {:.3}s on {}, {} node updates, {} failed trajectories, \
             mean utilities {:?}",
            self.iterations,
            self.elapsed.as_secs_f64(),
            self.backend,
            self.updated_nodes,
            self.total_failures(),
            self.mean_utilities
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

pub trait Solver<G: GameDefinition>: Strategy<G> {
    fn game_ref(&self) -> &G;

    fn run_iterations(
        &mut self,
        count: usize,
        options: &SolverOptions,
    ) -> Result<RunSummary, SolverError>;

    /// Policy the solver would play next at this information set.
    fn current_policy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>>;

    fn print_strategy(&self);
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[clap(flatten)]
        args: SolverArgs,
    }

    #[test]
    fn test_args_to_options() {
        let cli = TestCli::parse_from(["test", "--epsilon", "0.05", "--trajectories", "8"]);
        let options = cli.args.to_options();
        assert_eq!(PerturbationSchedule::Constant(0.05), options.perturbation);
        assert_eq!(
            TraversalMode::Sampled {
                trajectories: 8
            },
            options.traversal
        );
        assert_eq!(1000, cli.args.iterations);

        let cli = TestCli::parse_from([
            "test",
            "--epsilon",
            "0.2",
            "--epsilon-end",
            "0.01",
            "--anneal-iterations",
            "100",
            "--update-rule",
            "regret-matching-plus",
        ]);
        let options = cli.args.to_options();
        assert_eq!(
            PerturbationSchedule::Annealed {
                start: 0.2,
                end: 0.01,
                iterations: 100
            },
            options.perturbation
        );
        assert_eq!(UpdateRuleKind::RegretMatchingPlus, options.update_rule);
        assert_eq!(TraversalMode::FullTree, options.traversal);
    }
}
