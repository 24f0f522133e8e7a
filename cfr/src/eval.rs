use std::collections::HashMap;

use itertools::Itertools;
use log::debug;
use more_asserts::debug_assert_ge;

use crate::{
    error::SolverError,
    games::{
        ActionId,
        GameDefinition,
    },
    navigator::{
        HistoryPoint,
        Navigator,
    },
};

pub trait Strategy<G: GameDefinition> {
    fn get_strategy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>>;

    fn safe_get_strategy(
        &self,
        player: usize,
        actions_len: usize,
        info_set: &G::InfoSet,
    ) -> Vec<f64> {
        match self.get_strategy(player, info_set) {
            Some(s) => s,
            None => vec![1.0 / actions_len as f64; actions_len],
        }
    }
}

fn max_index(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_i, a), (_j, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Histories of one information set with the probability that the other players and
/// chance lead there.
type ReachProbabilities = HashMap<Vec<ActionId>, f64>;

struct BestResponse<'a, G: GameDefinition, St: Strategy<G>> {
    navigator: &'a Navigator<G>,
    strategy: &'a St,
    br_player: usize,
    reach_probabilities: HashMap<G::InfoSet, ReachProbabilities>,
    action_utilities: HashMap<G::InfoSet, Vec<f64>>,
}

impl<'a, G: GameDefinition, St: Strategy<G>> BestResponse<'a, G, St> {
    fn new(navigator: &'a Navigator<G>, strategy: &'a St, br_player: usize) -> Self {
        BestResponse {
            navigator,
            strategy,
            br_player,
            reach_probabilities: HashMap::new(),
            action_utilities: HashMap::new(),
        }
    }

    fn calc_reach_probabilities(
        &mut self,
        path: &mut Vec<ActionId>,
        reach_probability: f64,
    ) -> Result<(), SolverError> {
        let point = self.navigator.resolve(path)?;
        match &*point {
            HistoryPoint::Terminal(_) => {}
            HistoryPoint::Chance(node) => {
                for (act, prob) in &node.outcomes {
                    path.push(*act);
                    self.calc_reach_probabilities(path, reach_probability * prob)?;
                    path.pop();
                }
            }
            HistoryPoint::Decision(node) => {
                let probs = if node.player == self.br_player {
                    // the player plays the best response.
                    let rp = self.reach_probabilities.entry(node.info_set.clone()).or_default();
                    *rp.entry(path.clone()).or_insert(0.0) += reach_probability;
                    vec![1.0; node.actions.len()]
                } else {
                    self.strategy.safe_get_strategy(node.player, node.actions.len(), &node.info_set)
                };
                for (act, prob) in node.actions.iter().zip(probs) {
                    path.push(*act);
                    self.calc_reach_probabilities(path, reach_probability * prob)?;
                    path.pop();
                }
            }
        }
        Ok(())
    }

    /// Expected utility of `br_player` at `path` when it plays the best response and
    /// everyone else plays `strategy`.
    fn calc_best_response_value(&mut self, path: &mut Vec<ActionId>) -> Result<f64, SolverError> {
        let point = self.navigator.resolve(path)?;
        match &*point {
            HistoryPoint::Terminal(node) => Ok(node.utilities[self.br_player]),
            HistoryPoint::Chance(node) => {
                let mut node_util = 0.0;
                for (act, prob) in &node.outcomes {
                    path.push(*act);
                    node_util += prob * self.calc_best_response_value(path)?;
                    path.pop();
                }
                Ok(node_util)
            }
            HistoryPoint::Decision(node) if node.player == self.br_player => {
                // Check the best action for the current INFO SET (not the history)
                if !self.action_utilities.contains_key(&node.info_set) {
                    let siblings: Vec<(Vec<ActionId>, f64)> = self
                        .reach_probabilities
                        .get(&node.info_set)
                        .map(|rp| {
                            rp.iter()
                                .map(|(p, r)| (p.clone(), *r))
                                .sorted_by(|a, b| a.0.cmp(&b.0))
                                .collect()
                        })
                        .unwrap_or_default();
                    let mut act_utils = vec![0.0; node.actions.len()];
                    for (act_i, act) in node.actions.iter().enumerate() {
                        for (sibling, reach) in &siblings {
                            let mut next = sibling.clone();
                            next.push(*act);
                            act_utils[act_i] += reach * self.calc_best_response_value(&mut next)?;
                        }
                    }
                    self.action_utilities.insert(node.info_set.clone(), act_utils);
                }

                // Play the best response for the current HISTORY.
                let best =
                    self.action_utilities.get(&node.info_set).map(|u| max_index(u)).unwrap_or(0);
                path.push(node.actions[best]);
                let util = self.calc_best_response_value(path);
                path.pop();
                util
            }
            HistoryPoint::Decision(node) => {
                let probs = self.strategy.safe_get_strategy(
                    node.player,
                    node.actions.len(),
                    &node.info_set,
                );
                let mut node_util = 0.0;
                for (act, prob) in node.actions.iter().zip(probs) {
                    path.push(*act);
                    node_util += prob * self.calc_best_response_value(path)?;
                    path.pop();
                }
                Ok(node_util)
            }
        }
    }
}

/// Expected utilities of every player when everyone plays `strategy`.
pub fn calc_expected_values<G: GameDefinition, St: Strategy<G>>(
    navigator: &Navigator<G>,
    strategy: &St,
    path: &mut Vec<ActionId>,
) -> Result<Vec<f64>, SolverError> {
    let point = navigator.resolve(path)?;
    let (actions, probs): (Vec<ActionId>, Vec<f64>) = match &*point {
        HistoryPoint::Terminal(node) => return Ok(node.utilities.clone()),
        HistoryPoint::Chance(node) => node.outcomes.iter().cloned().unzip(),
        HistoryPoint::Decision(node) => (
            node.actions.clone(),
            strategy.safe_get_strategy(node.player, node.actions.len(), &node.info_set),
        ),
    };
    let mut ev = vec![0.0; navigator.game_ref().num_players()];
    for (act, prob) in actions.iter().zip(probs) {
        path.push(*act);
        let child = calc_expected_values(navigator, strategy, path)?;
        path.pop();
        for (e, c) in ev.iter_mut().zip(child) {
            *e += prob * c;
        }
    }
    Ok(ev)
}

/// Mean over players of how much each could gain by deviating to a best response.
/// For two-player zero-sum games this is the usual exploitability.
pub fn compute_exploitability<G: GameDefinition, St: Strategy<G>>(
    navigator: &Navigator<G>,
    strategy: &St,
) -> Result<f64, SolverError> {
    let num_players = navigator.game_ref().num_players();
    let ev = calc_expected_values(navigator, strategy, &mut vec![])?;
    let mut gain = 0.0;
    for player in 0..num_players {
        let mut br = BestResponse::new(navigator, strategy, player);
        br.calc_reach_probabilities(&mut vec![], 1.0)?;
        debug!("Calculating best response for player {}", player);
        let br_value = br.calc_best_response_value(&mut vec![])?;
        debug!("util_{}(br): {}, util_{}(strategy): {}", player, br_value, player, ev[player]);

        if log::log_enabled!(log::Level::Debug) {
            for info_set in br.action_utilities.keys().sorted() {
                debug!("{}: {:?}", info_set, br.action_utilities[info_set]);
            }
        }
        gain += br_value - ev[player];
    }
    let exploitability = gain / num_players as f64;
    debug_assert_ge!(exploitability, -1e-9, "Exploitability must be positive value.");
    Ok(exploitability)
}

impl<G: GameDefinition> Strategy<G> for HashMap<(usize, G::InfoSet), Vec<f64>> {
    fn get_strategy(&self, player: usize, info_set: &G::InfoSet) -> Option<Vec<f64>> {
        self.get(&(player, info_set.clone())).cloned()
    }
}
