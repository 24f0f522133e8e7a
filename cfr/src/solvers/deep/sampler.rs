use std::hash::Hasher;

use rand::{
    Rng,
    SeedableRng,
};
use wyhash::{
    WyHash,
    WyRng,
};

use super::{
    buffer::Observation,
    model::{
        DeepModel,
        PolicyCache,
        RegretRegressor,
    },
};
use crate::{
    error::{
        ensure_finite,
        SolverError,
    },
    games::{
        ActionId,
        InformationEncoder,
    },
    navigator::{
        HistoryPoint,
        Navigator,
    },
    pool::Recycle,
    solvers::cfr::trajectory::expected_value,
};

/// Picks an index of `policy` from a generator seeded only by the three integers, so the
/// same decision of the same trajectory always goes the same way.
pub fn sample_action(
    policy: &[f64],
    iteration: usize,
    variation: usize,
    decision_index: usize,
) -> Result<usize, SolverError> {
    ensure_finite("sampling policy", policy)?;
    let mut hasher = WyHash::with_seed(0);
    hasher.write_u64(iteration as u64);
    hasher.write_u64(variation as u64);
    hasher.write_u64(decision_index as u64);
    let mut rng = WyRng::seed_from_u64(hasher.finish());
    let total: f64 = policy.iter().sum();
    if total <= 0.0 {
        return Err(SolverError::numeric("sampling policy sums to zero", policy));
    }

    let draw = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, p) in policy.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return Ok(i);
        }
    }
    // rounding left the draw past the last bucket
    Ok(policy.iter().rposition(|p| *p > 0.0).unwrap_or(policy.len() - 1))
}

/// Decision index used for chance nodes, distinct from any game decision.
fn chance_decision_index(depth: usize) -> usize {
    usize::MAX - depth
}

/// Scratch state of one sampled trajectory of the function-approximation solver.
#[derive(Debug, Default)]
pub struct DeepProgress {
    pub path: Vec<ActionId>,
    pub observations: Vec<Observation>,
    pub cache: PolicyCache,
    pub value: f64,
}

impl Recycle for DeepProgress {
    fn reset(&mut self) {
        self.path.clear();
        self.observations.clear();
        self.cache.reset();
        self.value = 0.0;
    }
}

/// External-sampling walk that queries the model instead of a table.
pub struct DeepWalker<'a, G: InformationEncoder, R: RegretRegressor> {
    navigator: &'a Navigator<G>,
    model: &'a DeepModel<R>,
    traverser: usize,
    iteration: usize,
    variation: usize,
}

impl<'a, G: InformationEncoder, R: RegretRegressor> DeepWalker<'a, G, R> {
    pub fn new(
        navigator: &'a Navigator<G>,
        model: &'a DeepModel<R>,
        iteration: usize,
        variation: usize,
    ) -> Self {
        let traverser = variation % navigator.game_ref().num_players();
        DeepWalker {
            navigator,
            model,
            traverser,
            iteration,
            variation,
        }
    }

    pub fn traverser(&self) -> usize {
        self.traverser
    }

    /// Walks one trajectory, recording one observation per action at every traverser
    /// decision. Observations are weighted by `iteration + 1`.
    pub fn walk(&self, progress: &mut DeepProgress) -> Result<f64, SolverError> {
        progress.path.clear();
        let value = self.walk_rec(progress)?;
        progress.value = value;
        Ok(value)
    }

    fn walk_rec(&self, progress: &mut DeepProgress) -> Result<f64, SolverError> {
        let point = self.navigator.resolve(&progress.path)?;
        match &*point {
            HistoryPoint::Terminal(node) => Ok(node.utilities[self.traverser]),
            HistoryPoint::Chance(node) => {
                let probs: Vec<f64> = node.outcomes.iter().map(|(_, p)| *p).collect();
                let decision_index = chance_decision_index(progress.path.len());
                let index = sample_action(&probs, self.iteration, self.variation, decision_index)?;
                progress.path.push(node.outcomes[index].0);
                let result = self.walk_rec(progress);
                progress.path.pop();
                result
            }
            HistoryPoint::Decision(node) => {
                let game = self.navigator.game_ref();
                let decision_index = game.decision_index(&node.info_set);
                let encoding = game.encode(&node.info_set);
                let policy = self.model.query(
                    node.player,
                    decision_index,
                    &encoding,
                    node.actions.len(),
                    Some(&mut progress.cache),
                )?;

                if node.player != self.traverser {
                    let index =
                        sample_action(&policy, self.iteration, self.variation, decision_index)?;
                    progress.path.push(node.actions[index]);
                    let result = self.walk_rec(progress);
                    progress.path.pop();
                    return result;
                }

                let mut values = vec![0.0; node.actions.len()];
                for (i, act) in node.actions.iter().enumerate() {
                    progress.path.push(*act);
                    let result = self.walk_rec(progress);
                    progress.path.pop();
                    values[i] = result?;
                }
                let value = expected_value(&policy, &values);
                let weight = (self.iteration + 1) as f64;
                for (action_index, v) in values.iter().enumerate() {
                    progress.observations.push(Observation {
                        encoding: encoding.clone(),
                        player: node.player,
                        decision_index,
                        action_index,
                        regret: v - value,
                        weight,
                    });
                }
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        games::{
            kuhn::Kuhn,
            matrix::MatrixGame,
        },
        solvers::deep::model::LinearRegressor,
    };

    #[test]
    fn test_sample_action_is_reproducible() {
        let policy = [0.2, 0.3, 0.5];
        for iteration in 0..10 {
            for variation in 0..10 {
                let a = sample_action(&policy, iteration, variation, 4).unwrap();
                let b = sample_action(&policy, iteration, variation, 4).unwrap();
                assert_eq!(a, b);
                assert!(a < 3);
            }
        }
    }

    #[test]
    fn test_sample_action_skips_zero_probabilities() {
        for variation in 0..100 {
            let a = sample_action(&[0.0, 1.0, 0.0], 7, variation, 1).unwrap();
            assert_eq!(1, a);
        }
    }

    #[test]
    fn test_sample_action_follows_the_distribution() {
        let policy = [0.25, 0.75];
        let picks = (0..4000).filter(|v| sample_action(&policy, 0, *v, 0).unwrap() == 1).count();
        let share = picks as f64 / 4000.0;
        assert!((share - 0.75).abs() < 0.05, "{}", share);
    }

    #[test]
    fn test_sample_action_rejects_bad_policies() {
        assert!(sample_action(&[f64::NAN, 1.0], 0, 0, 0).is_err());
        assert!(sample_action(&[0.0, 0.0], 0, 0, 0).is_err());
    }

    #[test]
    fn test_walk_records_traverser_regrets() {
        let navigator = Navigator::new(MatrixGame::coordination());
        let model = DeepModel::new(LinearRegressor::default());
        let mut progress = DeepProgress::default();
        let walker = DeepWalker::new(&navigator, &model, 0, 0);
        assert_eq!(0, walker.traverser());
        walker.walk(&mut progress).unwrap();
        assert_eq!(2, progress.observations.len());
        // the column player was sampled, so the two regrets cancel under uniform play
        let total: f64 = progress.observations.iter().map(|o| o.regret).sum();
        assert!(total.abs() < 1e-12);
        assert!(progress.observations.iter().all(|o| o.weight == 1.0 && o.player == 0));
    }

    #[test]
    fn test_walk_is_reproducible() {
        let navigator = Navigator::new(Kuhn);
        let model = DeepModel::new(LinearRegressor::default());
        let run = |variation| {
            let mut progress = DeepProgress::default();
            let walker = DeepWalker::new(&navigator, &model, 5, variation);
            let value = walker.walk(&mut progress).unwrap();
            (value, progress.observations)
        };
        assert_eq!(run(3), run(3));
        let (_, observations) = run(1);
        assert!(observations.iter().all(|o| o.player == 1 && o.weight == 6.0));
    }
}
