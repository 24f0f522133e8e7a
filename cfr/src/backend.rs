//! Optional traversal backends standing in for the CPU full-tree pass.
//!
//! A backend is probed once. When the probe fails the caller gets an
//! [`UnavailableBackend`] whose every call reports [`SolverError::BackendUnavailable`],
//! and the trainer runs the CPU path for that call instead.

use std::{
    collections::HashMap,
    sync::Arc,
};

use log::{
    info,
    warn,
};

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
    solvers::cfr::{
        node::PendingRegret,
        store::InformationSetStore,
        trajectory::{
            expected_value,
            full_tree_sample,
        },
    },
};

pub const DEFAULT_MAX_NODES: usize = 1_000_000;

/// Policies frozen at the start of an iteration, indexed by backend slot.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub iteration: usize,
    pub policies: Vec<Vec<f64>>,
}

pub trait TraversalBackend<G: GameDefinition>: Send {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    fn initialize_iteration(
        &mut self,
        iteration: usize,
        store: &InformationSetStore<G::InfoSet>,
    ) -> Result<IterationContext, SolverError>;

    /// One full-tree pass per player. Returns each player's root utility.
    fn traverse(&mut self, ctx: &IterationContext) -> Result<Vec<f64>, SolverError>;

    fn flush_into_store(&mut self, store: &InformationSetStore<G::InfoSet>)
        -> Result<(), SolverError>;
}

#[derive(Debug)]
enum FlatNode {
    Terminal {
        utilities: Vec<f64>,
    },
    Chance {
        outcomes: Vec<(usize, f64)>,
    },
    Decision {
        player: usize,
        slot: usize,
        children: Vec<usize>,
    },
}

#[derive(Debug)]
struct Slot<K> {
    player: usize,
    info_set: K,
    actions: Vec<ActionId>,
}

/// The whole game tree compiled into index-linked arrays.
pub struct FlatTreeBackend<G: GameDefinition> {
    nodes: Vec<FlatNode>,
    root: usize,
    slots: Vec<Slot<G::InfoSet>>,
    pending: Vec<PendingRegret>,
    num_players: usize,
}

struct Compiler<'a, G: GameDefinition> {
    navigator: &'a Navigator<G>,
    max_nodes: usize,
    nodes: Vec<FlatNode>,
    slots: Vec<Slot<G::InfoSet>>,
    slot_index: HashMap<(usize, G::InfoSet), usize>,
}

impl<'a, G: GameDefinition> Compiler<'a, G> {
    fn compile(&mut self, path: &mut Vec<ActionId>) -> Result<usize, SolverError> {
        if self.nodes.len() >= self.max_nodes {
            return Err(SolverError::BackendUnavailable(format!(
                "game tree exceeds {} nodes",
                self.max_nodes
            )));
        }
        let point = self.navigator.resolve(path).map_err(|e| {
            SolverError::BackendUnavailable(format!("game tree failed to materialize: {}", e))
        })?;
        let node = match &*point {
            HistoryPoint::Terminal(node) => FlatNode::Terminal {
                utilities: node.utilities.clone(),
            },
            HistoryPoint::Chance(node) => {
                let mut outcomes = Vec::with_capacity(node.outcomes.len());
                for (act, prob) in &node.outcomes {
                    path.push(*act);
                    let child = self.compile(path);
                    path.pop();
                    outcomes.push((child?, *prob));
                }
                FlatNode::Chance {
                    outcomes,
                }
            }
            HistoryPoint::Decision(node) => {
                let mut children = Vec::with_capacity(node.actions.len());
                for act in &node.actions {
                    path.push(*act);
                    let child = self.compile(path);
                    path.pop();
                    children.push(child?);
                }
                let next_slot = self.slots.len();
                let slot = *self
                    .slot_index
                    .entry((node.player, node.info_set.clone()))
                    .or_insert(next_slot);
                if slot == next_slot {
                    self.slots.push(Slot {
                        player: node.player,
                        info_set: node.info_set.clone(),
                        actions: node.actions.clone(),
                    });
                }
                FlatNode::Decision {
                    player: node.player,
                    slot,
                    children,
                }
            }
        };
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }
}

impl<G: GameDefinition> FlatTreeBackend<G> {
    pub fn probe(navigator: &Navigator<G>, max_nodes: usize) -> Result<Self, SolverError> {
        let mut compiler = Compiler {
            navigator,
            max_nodes,
            nodes: vec![],
            slots: vec![],
            slot_index: HashMap::new(),
        };
        let root = compiler.compile(&mut vec![])?;
        let pending = compiler.slots.iter().map(|s| PendingRegret::new(s.actions.len())).collect();
        Ok(FlatTreeBackend {
            nodes: compiler.nodes,
            root,
            slots: compiler.slots,
            pending,
            num_players: navigator.game_ref().num_players(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    fn traverse_rec(
        &mut self,
        ctx: &IterationContext,
        index: usize,
        traverser: usize,
        reach: &mut [f64],
    ) -> f64 {
        match &self.nodes[index] {
            FlatNode::Terminal {
                utilities,
            } => utilities[traverser],
            FlatNode::Chance {
                outcomes,
            } => {
                let outcomes = outcomes.clone();
                let chance = reach.len() - 1;
                let mut value = 0.0;
                for (child, prob) in outcomes {
                    let saved = reach[chance];
                    reach[chance] *= prob;
                    let child_value = self.traverse_rec(ctx, child, traverser, reach);
                    reach[chance] = saved;
                    value += prob * child_value;
                }
                value
            }
            FlatNode::Decision {
                player,
                slot,
                children,
            } => {
                let (player, slot, children) = (*player, *slot, children.clone());
                let policy = &ctx.policies[slot];
                let mut values = vec![0.0; children.len()];
                for (i, child) in children.into_iter().enumerate() {
                    let saved = reach[player];
                    reach[player] *= policy[i];
                    values[i] = self.traverse_rec(ctx, child, traverser, reach);
                    reach[player] = saved;
                }
                let value = expected_value(policy, &values);
                if player == traverser {
                    let sample = full_tree_sample(policy, values, reach, player);
                    self.pending[slot].record(&sample);
                }
                value
            }
        }
    }
}

impl<G: GameDefinition> TraversalBackend<G> for FlatTreeBackend<G> {
    fn name(&self) -> &'static str {
        "flat tree"
    }

    fn initialize_iteration(
        &mut self,
        iteration: usize,
        store: &InformationSetStore<G::InfoSet>,
    ) -> Result<IterationContext, SolverError> {
        for pending in &mut self.pending {
            pending.reset();
        }
        let policies = self
            .slots
            .iter()
            .map(|s| {
                let cell = store.lookup_or_insert(s.player, &s.info_set, &s.actions);
                let policy = cell.read().get_policy().to_vec();
                policy
            })
            .collect();
        Ok(IterationContext {
            iteration,
            policies,
        })
    }

    fn traverse(&mut self, ctx: &IterationContext) -> Result<Vec<f64>, SolverError> {
        let mut values = Vec::with_capacity(self.num_players);
        for traverser in 0..self.num_players {
            let mut reach = vec![1.0; self.num_players + 1];
            values.push(self.traverse_rec(ctx, self.root, traverser, &mut reach));
        }
        Ok(values)
    }

    fn flush_into_store(
        &mut self,
        store: &InformationSetStore<G::InfoSet>,
    ) -> Result<(), SolverError> {
        for (slot, pending) in self.slots.iter().zip(self.pending.iter_mut()) {
            let cell = store.lookup_or_insert(slot.player, &slot.info_set, &slot.actions);
            cell.read().stats.merge(pending);
            pending.reset();
        }
        Ok(())
    }
}

/// Stand-in selected when no accelerated backend could be set up.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: Arc<str>,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        UnavailableBackend {
            reason: Arc::from(reason.into()),
        }
    }

    fn unavailable(&self) -> SolverError {
        SolverError::BackendUnavailable(self.reason.to_string())
    }
}

impl<G: GameDefinition> TraversalBackend<G> for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn initialize_iteration(
        &mut self,
        _iteration: usize,
        _store: &InformationSetStore<G::InfoSet>,
    ) -> Result<IterationContext, SolverError> {
        Err(self.unavailable())
    }

    fn traverse(&mut self, _ctx: &IterationContext) -> Result<Vec<f64>, SolverError> {
        Err(self.unavailable())
    }

    fn flush_into_store(
        &mut self,
        _store: &InformationSetStore<G::InfoSet>,
    ) -> Result<(), SolverError> {
        Err(self.unavailable())
    }
}

pub fn probe_backend<G: GameDefinition>(
    navigator: &Navigator<G>,
    max_nodes: usize,
) -> Box<dyn TraversalBackend<G>> {
    match FlatTreeBackend::probe(navigator, max_nodes) {
        Ok(backend) => {
            info!(
                "accelerated backend ready: {} nodes, {} information sets",
                backend.num_nodes(),
                backend.num_slots()
            );
            Box::new(backend)
        }
        Err(err) => {
            warn!("{}; using the CPU traversal", err);
            Box::new(UnavailableBackend::new(err.to_string()))
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
    fn test_probe_compiles_kuhn() {
        let navigator = Navigator::new(Kuhn);
        let backend = FlatTreeBackend::probe(&navigator, DEFAULT_MAX_NODES).unwrap();
        // root + 6 deals * 9 histories
        assert_eq!(1 + 6 * 9, backend.num_nodes());
        assert_eq!(12, backend.num_slots());
    }

    #[test]
    fn test_probe_respects_node_limit() {
        let navigator = Navigator::new(Kuhn);
        let backend = probe_backend(&navigator, 10);
        assert!(!backend.is_available());
        let store = InformationSetStore::new();
        let mut backend = backend;
        assert!(matches!(
            backend.initialize_iteration(0, &store),
            Err(SolverError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_traverse_returns_root_utilities() {
        let navigator = Navigator::new(MatrixGame::coordination());
        let store = InformationSetStore::new();
        let mut backend = FlatTreeBackend::probe(&navigator, DEFAULT_MAX_NODES).unwrap();
        let ctx = backend.initialize_iteration(0, &store).unwrap();
        assert_eq!(vec![3.0, 3.0], backend.traverse(&ctx).unwrap());
        backend.flush_into_store(&store).unwrap();
        let touched = store.nodes().iter().filter(|n| n.read().stats.is_touched()).count();
        assert_eq!(2, touched);
    }
}
