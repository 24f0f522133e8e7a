//! Update rules turning one iteration's accumulated regret into a new policy.

use std::fmt::Debug;

use clap::ValueEnum;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::{
        ensure_finite,
        SolverError,
    },
    solvers::cfr::node::NodeStatistics,
};

/// Exploration floor per iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum PerturbationSchedule {
    #[default]
    None,
    Constant(f64),
    /// Linear interpolation from `start` to `end` over `iterations`, then `end`.
    Annealed {
        start: f64,
        end: f64,
        iterations: usize,
    },
}

impl PerturbationSchedule {
    pub fn epsilon(&self, iteration: usize) -> f64 {
        match *self {
            PerturbationSchedule::None => 0.0,
            PerturbationSchedule::Constant(epsilon) => epsilon,
            PerturbationSchedule::Annealed {
                start,
                end,
                iterations,
            } => {
                if iterations == 0 || iteration >= iterations {
                    end
                } else {
                    let progress = iteration as f64 / iterations as f64;
                    start + (end - start) * progress
                }
            }
        }
    }
}

/// Converts accumulated regret into a new policy, once per touched node per iteration.
///
/// `prepare` runs once on the driver thread before the update phase; `update` then runs
/// concurrently on distinct nodes, each under that node's exclusive lock.
pub trait UpdateRule: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn prepare(&mut self, iteration: usize, schedule: &PerturbationSchedule);

    fn update(
        &self,
        stats: &mut NodeStatistics,
        weight_by_inverse_reach: bool,
    ) -> Result<(), SolverError>;
}

fn normalized_regret(
    stats: &NodeStatistics,
    weight_by_inverse_reach: bool,
) -> Result<Vec<f64>, SolverError> {
    let regret = stats.normalized_regret(weight_by_inverse_reach);
    ensure_finite("normalized regret", &regret)?;
    Ok(regret)
}

/// Vanilla regret matching with uniform strategy averaging.
#[derive(Debug, Default, Clone)]
pub struct RegretMatching {
    epsilon: f64,
}

impl UpdateRule for RegretMatching {
    fn name(&self) -> &'static str {
        "regret matching"
    }

    fn prepare(&mut self, iteration: usize, schedule: &PerturbationSchedule) {
        self.epsilon = schedule.epsilon(iteration);
    }

    fn update(
        &self,
        stats: &mut NodeStatistics,
        weight_by_inverse_reach: bool,
    ) -> Result<(), SolverError> {
        let regret = normalized_regret(stats, weight_by_inverse_reach)?;
        stats.accumulate_strategy(1.0);
        for (sum, r) in stats.cumulative_regret_mut().iter_mut().zip(regret) {
            *sum += r;
        }
        stats.recompute_policy(self.epsilon)?;
        stats.reset_pending();
        Ok(())
    }
}

/// CFR+: cumulative regret floored at zero, strategy averaged with weight `t`.
#[derive(Debug, Default, Clone)]
pub struct RegretMatchingPlus {
    epsilon: f64,
    iteration: usize,
}

impl UpdateRule for RegretMatchingPlus {
    fn name(&self) -> &'static str {
        "regret matching+"
    }

    fn prepare(&mut self, iteration: usize, schedule: &PerturbationSchedule) {
        self.epsilon = schedule.epsilon(iteration);
        self.iteration = iteration;
    }

    fn update(
        &self,
        stats: &mut NodeStatistics,
        weight_by_inverse_reach: bool,
    ) -> Result<(), SolverError> {
        let regret = normalized_regret(stats, weight_by_inverse_reach)?;
        stats.accumulate_strategy((self.iteration + 1) as f64);
        for (sum, r) in stats.cumulative_regret_mut().iter_mut().zip(regret) {
            *sum = (*sum + r).max(0.0);
        }
        stats.recompute_policy(self.epsilon)?;
        stats.reset_pending();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for DiscountParams {
    fn default() -> Self {
        Self {
            alpha: 1.5,
            beta: 0.0,
            gamma: 2.0,
        }
    }
}

impl DiscountParams {
    fn positive_regret_discount(&self, t: f64) -> f64 {
        t.powf(self.alpha) / (t.powf(self.alpha) + 1.0)
    }

    fn negative_regret_discount(&self, t: f64) -> f64 {
        t.powf(self.beta) / (t.powf(self.beta) + 1.0)
    }

    fn strategy_discount(&self, t: f64) -> f64 {
        (t / (t + 1.0)).powf(self.gamma)
    }
}

/// Discounted CFR: after folding in the iteration's regret, positive and negative
/// regrets and the strategy sum are scaled down by iteration-dependent factors.
#[derive(Debug, Default, Clone)]
pub struct Discounted {
    params: DiscountParams,
    epsilon: f64,
    iteration: usize,
}

impl Discounted {
    pub fn new(params: DiscountParams) -> Self {
        Discounted {
            params,
            ..Default::default()
        }
    }
}

impl UpdateRule for Discounted {
    fn name(&self) -> &'static str {
        "discounted"
    }

    fn prepare(&mut self, iteration: usize, schedule: &PerturbationSchedule) {
        self.epsilon = schedule.epsilon(iteration);
        self.iteration = iteration;
    }

    fn update(
        &self,
        stats: &mut NodeStatistics,
        weight_by_inverse_reach: bool,
    ) -> Result<(), SolverError> {
        let regret = normalized_regret(stats, weight_by_inverse_reach)?;
        stats.accumulate_strategy(1.0);

        let t = (self.iteration + 1) as f64;
        let positive = self.params.positive_regret_discount(t);
        let negative = self.params.negative_regret_discount(t);
        for (sum, r) in stats.cumulative_regret_mut().iter_mut().zip(regret) {
            *sum += r;
            *sum *= if *sum > 0.0 {
                positive
            } else {
                negative
            };
        }
        let strategy = self.params.strategy_discount(t);
        for sum in stats.cumulative_strategy_mut() {
            *sum *= strategy;
        }

        stats.recompute_policy(self.epsilon)?;
        stats.reset_pending();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum UpdateRuleKind {
    #[default]
    RegretMatching,
    RegretMatchingPlus,
    Discounted,
}

impl UpdateRuleKind {
    pub fn build(&self) -> Box<dyn UpdateRule> {
        match self {
            UpdateRuleKind::RegretMatching => Box::<RegretMatching>::default(),
            UpdateRuleKind::RegretMatchingPlus => Box::<RegretMatchingPlus>::default(),
            UpdateRuleKind::Discounted => Box::new(Discounted::new(DiscountParams::default())),
        }
    }
}
