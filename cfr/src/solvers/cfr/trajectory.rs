use std::{
    hash::Hasher,
    sync::Arc,
};

use rand::SeedableRng;
use rand_distr::{
    Distribution,
    WeightedIndex,
};
use wyhash::{
    WyHash,
    WyRng,
};

use super::{
    node::RegretSample,
    store::{
        InformationSetStore,
        NodeCell,
    },
};
use crate::{
    error::{
        GameDefinitionError,
        SolverError,
    },
    games::{
        ActionId,
        GameDefinition,
        InfoSetKey,
    },
    navigator::{
        HistoryPoint,
        Navigator,
    },
    pool::Recycle,
};

/// Scratch state of one trajectory. Samples are buffered here and only reach the store
/// when the trajectory completes, so a failed trajectory leaves no trace.
pub struct TrajectoryProgress<K: InfoSetKey> {
    pub path: Vec<ActionId>,
    pub samples: Vec<(NodeCell<K>, RegretSample)>,
    pub value: f64,
}

impl<K: InfoSetKey> Default for TrajectoryProgress<K> {
    fn default() -> Self {
        TrajectoryProgress {
            path: vec![],
            samples: vec![],
            value: 0.0,
        }
    }
}

impl<K: InfoSetKey> Recycle for TrajectoryProgress<K> {
    fn reset(&mut self) {
        self.path.clear();
        self.samples.clear();
        self.value = 0.0;
    }
}

impl<K: InfoSetKey> TrajectoryProgress<K> {
    /// Moves the buffered samples into the store's per-iteration accumulators.
    pub fn apply(&mut self) {
        for (cell, sample) in self.samples.drain(..) {
            cell.read().stats.accumulate(&sample);
        }
    }
}

/// Product of every reach entry except `player`'s. The last entry is chance.
pub fn counterfactual_reach(reach: &[f64], player: usize) -> f64 {
    reach.iter().enumerate().filter(|(i, _)| *i != player).map(|(_, r)| r).product()
}

pub fn expected_value(policy: &[f64], values: &[f64]) -> f64 {
    policy.iter().zip(values.iter()).map(|(p, v)| p * v).sum()
}

/// Regret sample of the traverser at a node where every action was explored.
pub fn full_tree_sample(
    policy: &[f64],
    values: Vec<f64>,
    reach: &[f64],
    player: usize,
) -> RegretSample {
    let value = expected_value(policy, &values);
    let cf_reach = counterfactual_reach(reach, player);
    let regrets = values.iter().map(|v| cf_reach * (v - value)).collect();
    RegretSample::new(regrets, values, reach[player])
}

/// Per-trajectory generator; depends only on the three integers.
pub fn trajectory_rng(seed: u64, iteration: usize, variation: usize) -> WyRng {
    let mut hasher = WyHash::with_seed(seed);
    hasher.write_u64(iteration as u64);
    hasher.write_u64(variation as u64);
    WyRng::seed_from_u64(hasher.finish())
}

fn sample_index(weights: &[f64], rng: &mut WyRng) -> Result<usize, SolverError> {
    let dist =
        WeightedIndex::new(weights).map_err(|e| SolverError::numeric(e.to_string(), weights))?;
    Ok(dist.sample(rng))
}

pub struct Walker<'a, G: GameDefinition> {
    navigator: &'a Navigator<G>,
    store: &'a InformationSetStore<G::InfoSet>,
    traverser: usize,
}

impl<'a, G: GameDefinition> Walker<'a, G> {
    pub fn new(
        navigator: &'a Navigator<G>,
        store: &'a InformationSetStore<G::InfoSet>,
        traverser: usize,
    ) -> Self {
        Walker {
            navigator,
            store,
            traverser,
        }
    }

    fn resolve(&self, path: &[ActionId]) -> Result<Arc<HistoryPoint<G>>, GameDefinitionError> {
        self.navigator.resolve(path)
    }

    /// Vanilla CFR pass: chance and every action enumerated. Returns the traverser's
    /// expected utility.
    pub fn full_tree(
        &self,
        progress: &mut TrajectoryProgress<G::InfoSet>,
    ) -> Result<f64, SolverError> {
        let mut reach = vec![1.0; self.navigator.game_ref().num_players() + 1];
        progress.path.clear();
        let value = self.full_tree_rec(progress, &mut reach)?;
        progress.value = value;
        Ok(value)
    }

    fn full_tree_rec(
        &self,
        progress: &mut TrajectoryProgress<G::InfoSet>,
        reach: &mut [f64],
    ) -> Result<f64, SolverError> {
        let point = self.resolve(&progress.path)?;
        match &*point {
            HistoryPoint::Terminal(node) => Ok(node.utilities[self.traverser]),
            HistoryPoint::Chance(node) => {
                let chance = reach.len() - 1;
                let mut value = 0.0;
                for (act, prob) in &node.outcomes {
                    let saved = reach[chance];
                    reach[chance] *= prob;
                    progress.path.push(*act);
                    let result = self.full_tree_rec(progress, reach);
                    progress.path.pop();
                    reach[chance] = saved;
                    value += prob * result?;
                }
                Ok(value)
            }
            HistoryPoint::Decision(node) => {
                let cell = self.store.lookup_or_insert(node.player, &node.info_set, &node.actions);
                let policy = cell.read().get_policy().to_vec();

                let mut values = vec![0.0; node.actions.len()];
                for (i, act) in node.actions.iter().enumerate() {
                    let saved = reach[node.player];
                    reach[node.player] *= policy[i];
                    progress.path.push(*act);
                    let result = self.full_tree_rec(progress, reach);
                    progress.path.pop();
                    reach[node.player] = saved;
                    values[i] = result?;
                }

                let value = expected_value(&policy, &values);
                if node.player == self.traverser {
                    let sample = full_tree_sample(&policy, values, reach, node.player);
                    progress.samples.push((cell, sample));
                }
                Ok(value)
            }
        }
    }

    /// External-sampling pass: chance and opponents sampled, the traverser's actions
    /// enumerated. Opponent nodes get their average-strategy contribution here.
    pub fn sampled(
        &self,
        progress: &mut TrajectoryProgress<G::InfoSet>,
        rng: &mut WyRng,
    ) -> Result<f64, SolverError> {
        progress.path.clear();
        let value = self.sampled_rec(progress, rng, 1.0)?;
        progress.value = value;
        Ok(value)
    }

    fn sampled_rec(
        &self,
        progress: &mut TrajectoryProgress<G::InfoSet>,
        rng: &mut WyRng,
        own_reach: f64,
    ) -> Result<f64, SolverError> {
        let point = self.resolve(&progress.path)?;
        match &*point {
            HistoryPoint::Terminal(node) => Ok(node.utilities[self.traverser]),
            HistoryPoint::Chance(node) => {
                let weights: Vec<f64> = node.outcomes.iter().map(|(_, p)| *p).collect();
                let index = sample_index(&weights, rng)?;
                progress.path.push(node.outcomes[index].0);
                let result = self.sampled_rec(progress, rng, own_reach);
                progress.path.pop();
                result
            }
            HistoryPoint::Decision(node) => {
                let cell = self.store.lookup_or_insert(node.player, &node.info_set, &node.actions);
                let policy = cell.read().get_policy().to_vec();

                if node.player != self.traverser {
                    let index = sample_index(&policy, rng)?;
                    progress.path.push(node.actions[index]);
                    let result = self.sampled_rec(progress, rng, own_reach);
                    progress.path.pop();
                    progress.samples.push((cell, RegretSample::strategy_only(1.0)));
                    return result;
                }

                let mut values = vec![0.0; node.actions.len()];
                for (i, act) in node.actions.iter().enumerate() {
                    progress.path.push(*act);
                    let result = self.sampled_rec(progress, rng, own_reach * policy[i]);
                    progress.path.pop();
                    values[i] = result?;
                }
                let value = expected_value(&policy, &values);
                let regrets = values.iter().map(|v| v - value).collect();
                let mut sample = RegretSample::new(regrets, values, own_reach);
                sample.reach = 0.0;
                progress.samples.push((cell, sample));
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{
        kuhn::Kuhn,
        matrix::MatrixGame,
    };

    #[test]
    fn test_counterfactual_reach() {
        assert_eq!(0.5 * 0.25, counterfactual_reach(&[0.1, 0.5, 0.25], 0));
        assert_eq!(0.1 * 0.25, counterfactual_reach(&[0.1, 0.5, 0.25], 1));
    }

    #[test]
    fn test_full_tree_on_coordination_game() {
        let navigator = Navigator::new(MatrixGame::coordination());
        let store = InformationSetStore::new();
        let mut progress = TrajectoryProgress::default();
        // uniform play: (6 + 1 + 2 + 3) / 4
        let value = Walker::new(&navigator, &store, 0).full_tree(&mut progress).unwrap();
        assert_eq!(3.0, value);
        assert_eq!(1, progress.samples.len());
        let sample = &progress.samples[0].1;
        // action 1: (6 + 1) / 2 = 3.5, action 2: (2 + 3) / 2 = 2.5
        assert_eq!(vec![3.5, 2.5], sample.action_values);
        assert_eq!(vec![0.5, -0.5], sample.regrets);
        assert_eq!(1.0, sample.reach);
        // both players' nodes exist, only the traverser's got a sample
        assert_eq!(2, store.len());
    }

    #[test]
    fn test_samples_are_buffered_until_applied() {
        let navigator = Navigator::new(Kuhn);
        let store = InformationSetStore::new();
        let mut progress = TrajectoryProgress::default();
        Walker::new(&navigator, &store, 1).full_tree(&mut progress).unwrap();
        // player 1 acts at 6 information sets in kuhn
        assert_eq!(12, store.len());
        assert_eq!(6 * 2, progress.samples.len());
        assert!(store.nodes().iter().all(|n| !n.read().stats.is_touched()));
        progress.apply();
        assert!(progress.samples.is_empty());
        let touched = store.nodes().iter().filter(|n| n.read().stats.is_touched()).count();
        assert_eq!(6, touched);
    }

    #[test]
    fn test_sampled_trajectory_is_reproducible() {
        let navigator = Navigator::new(Kuhn);
        let store = InformationSetStore::new();
        let run = |variation| {
            let mut progress = TrajectoryProgress::default();
            let mut rng = trajectory_rng(42, 3, variation);
            let walker = Walker::new(&navigator, &store, 0);
            let value = walker.sampled(&mut progress, &mut rng).unwrap();
            let regrets: Vec<Vec<f64>> =
                progress.samples.iter().map(|(_, s)| s.regrets.clone()).collect();
            (value, regrets)
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn test_progress_reset() {
        let navigator = Navigator::new(Kuhn);
        let store = InformationSetStore::new();
        let mut progress = TrajectoryProgress::default();
        Walker::new(&navigator, &store, 0).full_tree(&mut progress).unwrap();
        progress.reset();
        assert!(progress.path.is_empty());
        assert!(progress.samples.is_empty());
        assert_eq!(0.0, progress.value);
    }
}
