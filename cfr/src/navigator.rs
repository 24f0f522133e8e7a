//! Lazily materialized game tree addressed by action sequences.

use std::{
    collections::HashMap,
    hash::{
        BuildHasherDefault,
        Hash,
        Hasher,
    },
    sync::Arc,
};

use log::debug;
use parking_lot::RwLock;
use wyhash::WyHash;

use crate::{
    error::GameDefinitionError,
    games::{
        ActionId,
        GameDefinition,
        PlayerId,
    },
};

const SHARDS: usize = 16;

type PathMap<G> = HashMap<Vec<ActionId>, Arc<HistoryPoint<G>>, BuildHasherDefault<WyHash>>;

#[derive(Debug)]
pub struct DecisionNode<G: GameDefinition> {
    pub state: G::State,
    pub player: usize,
    pub actions: Vec<ActionId>,
    pub info_set: G::InfoSet,
}

#[derive(Debug)]
pub struct ChanceNode<G: GameDefinition> {
    pub state: G::State,
    pub outcomes: Vec<(ActionId, f64)>,
}

#[derive(Debug)]
pub struct TerminalNode<G: GameDefinition> {
    pub state: G::State,
    pub utilities: Vec<f64>,
}

/// A resolved tree position.
#[derive(Debug)]
pub enum HistoryPoint<G: GameDefinition> {
    Decision(DecisionNode<G>),
    Chance(ChanceNode<G>),
    Terminal(TerminalNode<G>),
}

impl<G: GameDefinition> HistoryPoint<G> {
    /// Classifies `state`, rejecting game output that no traversal could use.
    pub fn from_state(
        game: &G,
        state: G::State,
        path: &[ActionId],
    ) -> Result<Self, GameDefinitionError> {
        if game.is_terminal(&state) {
            let utilities = game.utilities(&state);
            if utilities.len() != game.num_players() {
                return Err(GameDefinitionError::new(
                    path,
                    format!(
                        "{} utilities for {} players",
                        utilities.len(),
                        game.num_players()
                    ),
                ));
            }
            return Ok(HistoryPoint::Terminal(TerminalNode {
                state,
                utilities,
            }));
        }
        match game.node_player_id(&state) {
            PlayerId::Chance => {
                let outcomes = game.chance_actions(&state);
                if outcomes.is_empty() {
                    return Err(GameDefinitionError::new(path, "chance node without outcomes"));
                }
                Ok(HistoryPoint::Chance(ChanceNode {
                    state,
                    outcomes,
                }))
            }
            PlayerId::Player(player) => {
                if player >= game.num_players() {
                    return Err(GameDefinitionError::new(
                        path,
                        format!("player {} of {} acts", player, game.num_players()),
                    ));
                }
                let actions = game.legal_actions(&state);
                if actions.is_empty() {
                    return Err(GameDefinitionError::new(path, "decision without legal actions"));
                }
                let info_set = game.information_set_key(&state, player);
                Ok(HistoryPoint::Decision(DecisionNode {
                    state,
                    player,
                    actions,
                    info_set,
                }))
            }
        }
    }

    pub fn state(&self) -> &G::State {
        match self {
            HistoryPoint::Decision(node) => &node.state,
            HistoryPoint::Chance(node) => &node.state,
            HistoryPoint::Terminal(node) => &node.state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HistoryPoint::Terminal(_))
    }

    fn accepts(&self, action: ActionId) -> bool {
        match self {
            HistoryPoint::Decision(node) => node.actions.contains(&action),
            HistoryPoint::Chance(node) => node.outcomes.iter().any(|(a, _)| *a == action),
            HistoryPoint::Terminal(_) => false,
        }
    }
}

/// Cursor factory over the implicit tree of a game.
///
/// `resolve` may be called concurrently. Two callers racing on the same missing path
/// both compute it; the first insert wins and the other copy is dropped. The root is
/// materialized on first use, like every other node.
pub struct Navigator<G: GameDefinition> {
    game: G,
    root: RwLock<Option<Arc<HistoryPoint<G>>>>,
    shards: Vec<RwLock<PathMap<G>>>,
}

impl<G: GameDefinition> Navigator<G> {
    pub fn new(game: G) -> Self {
        Navigator {
            game,
            root: RwLock::new(None),
            shards: (0..SHARDS).map(|_| RwLock::new(PathMap::<G>::default())).collect(),
        }
    }

    pub fn game_ref(&self) -> &G {
        &self.game
    }

    pub fn root(&self) -> Result<Arc<HistoryPoint<G>>, GameDefinitionError> {
        if let Some(root) = self.root.read().as_ref() {
            return Ok(Arc::clone(root));
        }
        let point = HistoryPoint::from_state(&self.game, self.game.initial_state(), &[])?;
        Ok(Arc::clone(self.root.write().get_or_insert_with(|| Arc::new(point))))
    }

    /// Returns the node reached by playing `path` from the root.
    pub fn resolve(&self, path: &[ActionId]) -> Result<Arc<HistoryPoint<G>>, GameDefinitionError> {
        if path.is_empty() {
            return self.root();
        }
        if let Some(point) = self.cached(path) {
            return Ok(point);
        }

        let (mut depth, mut point) = self.nearest_cached_ancestor(path)?;
        debug!("replaying {:?} from depth {}", path, depth);
        while depth < path.len() {
            let action = path[depth];
            if !point.accepts(action) {
                return Err(GameDefinitionError::new(
                    &path[..=depth],
                    format!("action {} is not available here", action),
                ));
            }
            let next = self.game.advance(point.state(), action).map_err(|mut err| {
                err.path = path[..=depth].to_vec();
                err
            })?;
            depth += 1;
            let next = HistoryPoint::from_state(&self.game, next, &path[..depth])?;
            point = self.insert(&path[..depth], next);
        }
        Ok(point)
    }

    pub fn child(
        &self,
        path: &[ActionId],
        action: ActionId,
    ) -> Result<Arc<HistoryPoint<G>>, GameDefinitionError> {
        let mut next = Vec::with_capacity(path.len() + 1);
        next.extend_from_slice(path);
        next.push(action);
        self.resolve(&next)
    }

    pub fn is_cached(&self, path: &[ActionId]) -> bool {
        path.is_empty() || self.cached(path).is_some()
    }

    /// Number of cached non-root nodes.
    pub fn cached_nodes(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Decision nodes materialized so far, the root included, in no particular order.
    pub fn cached_decisions(&self) -> Vec<Arc<HistoryPoint<G>>> {
        let is_decision = |p: &&Arc<HistoryPoint<G>>| matches!(***p, HistoryPoint::Decision(_));
        let mut decisions: Vec<_> =
            self.root.read().iter().filter(is_decision).cloned().collect();
        for shard in &self.shards {
            decisions.extend(shard.read().values().filter(is_decision).cloned());
        }
        decisions
    }

    fn shard(&self, path: &[ActionId]) -> &RwLock<PathMap<G>> {
        let mut hasher = WyHash::with_seed(0);
        path.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    fn cached(&self, path: &[ActionId]) -> Option<Arc<HistoryPoint<G>>> {
        self.shard(path).read().get(path).cloned()
    }

    fn nearest_cached_ancestor(
        &self,
        path: &[ActionId],
    ) -> Result<(usize, Arc<HistoryPoint<G>>), GameDefinitionError> {
        for depth in (1..path.len()).rev() {
            if let Some(point) = self.cached(&path[..depth]) {
                return Ok((depth, point));
            }
        }
        Ok((0, self.root()?))
    }

    fn insert(&self, path: &[ActionId], point: HistoryPoint<G>) -> Arc<HistoryPoint<G>> {
        let mut shard = self.shard(path).write();
        Arc::clone(shard.entry(path.to_vec()).or_insert_with(|| Arc::new(point)))
    }
}
