use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
};

use super::{
    ActionId,
    GameDefinition,
    InformationEncoder,
    PlayerId,
};
use crate::error::GameDefinitionError;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Card {
    Jack = 0,
    Queen = 1,
    King = 2,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KuhnAction {
    Pass = 1,
    Bet = 2,
}

impl KuhnAction {
    pub fn from_id(id: ActionId) -> Option<Self> {
        match id {
            1 => Some(KuhnAction::Pass),
            2 => Some(KuhnAction::Bet),
            _ => None,
        }
    }

    pub fn id(&self) -> ActionId {
        *self as ActionId
    }
}

impl Display for KuhnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Every ordered pair of distinct cards, in chance-action order (action id = index + 1).
const DEALS: [[Card; 2]; 6] = [
    [Card::Jack, Card::Queen],
    [Card::Jack, Card::King],
    [Card::Queen, Card::Jack],
    [Card::Queen, Card::King],
    [Card::King, Card::Jack],
    [Card::King, Card::Queen],
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KuhnInfoSet {
    pub player: usize,
    pub card: Card,
    pub history: Vec<KuhnAction>,
}

impl Display for KuhnInfoSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}({:5}): [", self.player, format!("{:?}", self.card))?;
        for act in &self.history {
            write!(f, "{},", act)?;
        }
        write!(f, "]")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KuhnState {
    pub cards: Option<[Card; 2]>,
    pub history: Vec<KuhnAction>,
}

impl KuhnState {
    fn next_player(&self) -> usize {
        self.history.len() % 2
    }
}

/// Two-player Kuhn poker with an ante of one chip and a single bet size of one chip.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kuhn;

impl GameDefinition for Kuhn {
    type State = KuhnState;
    type InfoSet = KuhnInfoSet;

    fn num_players(&self) -> usize {
        2
    }

    fn initial_state(&self) -> KuhnState {
        KuhnState {
            cards: None,
            history: vec![],
        }
    }

    fn node_player_id(&self, state: &KuhnState) -> PlayerId {
        if state.cards.is_none() {
            PlayerId::Chance
        } else {
            PlayerId::Player(state.next_player())
        }
    }

    fn is_terminal(&self, state: &KuhnState) -> bool {
        use KuhnAction::*;
        matches!(
            state.history.as_slice(),
            [Pass, Pass] | [Bet, Pass] | [Bet, Bet] | [Pass, Bet, Pass] | [Pass, Bet, Bet]
        )
    }

    fn legal_actions(&self, _state: &KuhnState) -> Vec<ActionId> {
        vec![KuhnAction::Pass.id(), KuhnAction::Bet.id()]
    }

    fn chance_actions(&self, _state: &KuhnState) -> Vec<(ActionId, f64)> {
        (1..=DEALS.len() as ActionId).map(|id| (id, 1.0 / DEALS.len() as f64)).collect()
    }

    fn advance(
        &self,
        state: &KuhnState,
        action: ActionId,
    ) -> Result<KuhnState, GameDefinitionError> {
        let mut next = state.clone();
        if state.cards.is_none() {
            let deal = DEALS
                .get((action as usize).wrapping_sub(1))
                .ok_or_else(|| GameDefinitionError::new(&[], format!("unknown deal {}", action)))?;
            next.cards = Some(*deal);
            return Ok(next);
        }
        if self.is_terminal(state) {
            return Err(GameDefinitionError::new(&[], "the hand is already over"));
        }
        let act = KuhnAction::from_id(action)
            .ok_or_else(|| GameDefinitionError::new(&[], format!("unknown action {}", action)))?;
        next.history.push(act);
        Ok(next)
    }

    fn utilities(&self, state: &KuhnState) -> Vec<f64> {
        use KuhnAction::*;
        debug_assert!(self.is_terminal(state));
        let win = match state.cards {
            Some(cards) => cards[0] > cards[1],
            None => return vec![0.0, 0.0],
        };
        let showdown = |stake: f64| {
            if win {
                vec![stake, -stake]
            } else {
                vec![-stake, stake]
            }
        };
        match state.history.as_slice() {
            // player 1 folded
            [Bet, Pass] => vec![1.0, -1.0],
            // player 0 folded
            [Pass, Bet, Pass] => vec![-1.0, 1.0],
            [Pass, Pass] => showdown(1.0),
            [Bet, Bet] | [Pass, Bet, Bet] => showdown(2.0),
            _ => vec![0.0, 0.0],
        }
    }

    fn information_set_key(&self, state: &KuhnState, player: usize) -> KuhnInfoSet {
        let card = state.cards.map(|c| c[player]).unwrap_or(Card::Jack);
        KuhnInfoSet {
            player,
            card,
            history: state.history.clone(),
        }
    }
}

impl InformationEncoder for Kuhn {
    fn decision_index(&self, info_set: &KuhnInfoSet) -> usize {
        1 + info_set.history.len()
    }

    fn encode(&self, info_set: &KuhnInfoSet) -> Vec<f64> {
        let mut features = vec![0.0; 3 + 2 * 3];
        features[info_set.card as usize] = 1.0;
        for (i, act) in info_set.history.iter().enumerate() {
            let offset = 3 + 2 * i;
            match act {
                KuhnAction::Pass => features[offset] = 1.0,
                KuhnAction::Bet => features[offset + 1] = 1.0,
            }
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(actions: &[ActionId]) -> KuhnState {
        let game = Kuhn;
        let mut state = game.initial_state();
        for act in actions {
            state = game.advance(&state, *act).unwrap();
        }
        state
    }

    #[test]
    fn test_payoffs() {
        let game = Kuhn;
        // K vs Q, both pass
        let state = play(&[6, 1, 1]);
        assert!(game.is_terminal(&state));
        assert_eq!(vec![1.0, -1.0], game.utilities(&state));

        // J vs K, pass, bet, call
        let state = play(&[2, 1, 2, 2]);
        assert!(game.is_terminal(&state));
        assert_eq!(vec![-2.0, 2.0], game.utilities(&state));

        // J vs K, bet, fold
        let state = play(&[2, 2, 1]);
        assert_eq!(vec![1.0, -1.0], game.utilities(&state));
    }

    #[test]
    fn test_node_players() {
        let game = Kuhn;
        assert_eq!(PlayerId::Chance, game.node_player_id(&play(&[])));
        assert_eq!(PlayerId::Player(0), game.node_player_id(&play(&[3])));
        assert_eq!(PlayerId::Player(1), game.node_player_id(&play(&[3, 1])));
        assert_eq!(PlayerId::Player(0), game.node_player_id(&play(&[3, 1, 2])));
    }

    #[test]
    fn test_advance_rejects_unknown_actions() {
        let game = Kuhn;
        let state = play(&[1]);
        assert!(game.advance(&state, 7).is_err());
        assert!(game.advance(&play(&[]), 0).is_err());
        assert!(game.advance(&play(&[1, 1, 1]), 1).is_err());
    }

    #[test]
    fn test_info_set_hides_opponent_card() {
        let game = Kuhn;
        let a = game.information_set_key(&play(&[1, 1]), 1);
        let b = game.information_set_key(&play(&[6, 1]), 1);
        assert_eq!(a, b);
        assert_eq!(Card::Queen, a.card);
        assert_eq!(2, game.decision_index(&a));
    }
}
