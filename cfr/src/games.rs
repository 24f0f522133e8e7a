use std::{
    fmt::{
        Debug,
        Display,
    },
    hash::Hash,
};

use serde::{
    de::DeserializeOwned,
    Serialize,
};

use crate::error::GameDefinitionError;

pub mod kuhn;
pub mod matrix;

/// Identifier of an action at a node. Ids are small positive integers starting at 1.
pub type ActionId = u8;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlayerId {
    Chance,
    Player(usize),
}

impl PlayerId {
    pub fn index(&self) -> usize {
        match self {
            PlayerId::Player(i) => *i,
            PlayerId::Chance => panic!("chance nodes have no player index"),
        }
    }
}

/// Opaque key identifying an information set of one player.
pub trait InfoSetKey:
    Display + Debug + Hash + Eq + Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> InfoSetKey for T where
    T: Display
        + Debug
        + Hash
        + Eq
        + Ord
        + Clone
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static
{
}

/// The contract a concrete game supplies to the solvers.
///
/// Game states are plain values; the navigator caches them by action sequence so a
/// definition never needs to remember what it has computed.
pub trait GameDefinition: Send + Sync + 'static {
    type State: Clone + Debug + Send + Sync;
    type InfoSet: InfoSetKey;

    /// Number of non-chance players.
    fn num_players(&self) -> usize;

    fn initial_state(&self) -> Self::State;

    fn node_player_id(&self, state: &Self::State) -> PlayerId;

    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Ordered legal actions of a decision node.
    fn legal_actions(&self, state: &Self::State) -> Vec<ActionId>;

    /// Outcomes of a chance node with their probabilities.
    fn chance_actions(&self, state: &Self::State) -> Vec<(ActionId, f64)>;

    fn advance(
        &self,
        state: &Self::State,
        action: ActionId,
    ) -> Result<Self::State, GameDefinitionError>;

    /// One payoff per non-chance player. Only called on terminal states.
    fn utilities(&self, state: &Self::State) -> Vec<f64>;

    fn information_set_key(&self, state: &Self::State, player: usize) -> Self::InfoSet;
}

/// Feature encoding of information sets, required by the function-approximation solver.
pub trait InformationEncoder: GameDefinition {
    /// Stable index of the decision an information set belongs to. Observations and
    /// regressors are grouped by `(player, decision_index)`.
    fn decision_index(&self, info_set: &Self::InfoSet) -> usize;

    fn encode(&self, info_set: &Self::InfoSet) -> Vec<f64>;
}
