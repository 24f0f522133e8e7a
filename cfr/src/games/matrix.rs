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

/// A two-player simultaneous-move game played as two sequential decisions where the
/// second player does not observe the first player's choice.
#[derive(Debug, Clone)]
pub struct MatrixGame {
    /// `payoffs[row][col]` = (row player payoff, column player payoff)
    payoffs: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixState {
    pub row: Option<ActionId>,
    pub col: Option<ActionId>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixInfoSet {
    pub player: usize,
}

impl Display for MatrixInfoSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.player)
    }
}

impl MatrixGame {
    pub fn new(payoffs: Vec<Vec<[f64; 2]>>) -> Self {
        assert!(!payoffs.is_empty(), "a matrix game needs at least one row");
        let cols = payoffs[0].len();
        assert!(cols > 0 && payoffs.iter().all(|r| r.len() == cols), "ragged payoff matrix");
        MatrixGame {
            payoffs,
        }
    }

    /// The coordination game `[[6,6],[1,1]] / [[2,2],[3,3]]`. Action 1 for both
    /// players is the payoff-dominant joint action.
    pub fn coordination() -> Self {
        MatrixGame::new(vec![
            vec![[6.0, 6.0], [1.0, 1.0]],
            vec![[2.0, 2.0], [3.0, 3.0]],
        ])
    }

    pub fn rock_paper_scissors() -> Self {
        let payoff = |a: usize, b: usize| -> [f64; 2] {
            if a == b {
                [0.0, 0.0]
            } else if (a + 1) % 3 == b {
                // paper beats rock, scissors beats paper, rock beats scissors
                [-1.0, 1.0]
            } else {
                [1.0, -1.0]
            }
        };
        MatrixGame::new((0..3).map(|a| (0..3).map(|b| payoff(a, b)).collect()).collect())
    }

    pub fn num_actions(&self, player: usize) -> usize {
        match player {
            0 => self.payoffs.len(),
            _ => self.payoffs[0].len(),
        }
    }
}

impl GameDefinition for MatrixGame {
    type State = MatrixState;
    type InfoSet = MatrixInfoSet;

    fn num_players(&self) -> usize {
        2
    }

    fn initial_state(&self) -> MatrixState {
        MatrixState {
            row: None,
            col: None,
        }
    }

    fn node_player_id(&self, state: &MatrixState) -> PlayerId {
        match state.row {
            None => PlayerId::Player(0),
            Some(_) => PlayerId::Player(1),
        }
    }

    fn is_terminal(&self, state: &MatrixState) -> bool {
        state.row.is_some() && state.col.is_some()
    }

    fn legal_actions(&self, state: &MatrixState) -> Vec<ActionId> {
        let player = self.node_player_id(state).index();
        (1..=self.num_actions(player) as ActionId).collect()
    }

    fn chance_actions(&self, _state: &MatrixState) -> Vec<(ActionId, f64)> {
        vec![]
    }

    fn advance(
        &self,
        state: &MatrixState,
        action: ActionId,
    ) -> Result<MatrixState, GameDefinitionError> {
        if self.is_terminal(state) {
            return Err(GameDefinitionError::new(&[], "both players have already moved"));
        }
        let player = self.node_player_id(state).index();
        if action == 0 || action as usize > self.num_actions(player) {
            return Err(GameDefinitionError::new(&[], format!("action {} out of range", action)));
        }
        let mut next = state.clone();
        match player {
            0 => next.row = Some(action),
            _ => next.col = Some(action),
        }
        Ok(next)
    }

    fn utilities(&self, state: &MatrixState) -> Vec<f64> {
        match (state.row, state.col) {
            (Some(r), Some(c)) => self.payoffs[r as usize - 1][c as usize - 1].to_vec(),
            _ => vec![0.0, 0.0],
        }
    }

    fn information_set_key(&self, _state: &MatrixState, player: usize) -> MatrixInfoSet {
        MatrixInfoSet {
            player,
        }
    }
}

impl InformationEncoder for MatrixGame {
    fn decision_index(&self, info_set: &MatrixInfoSet) -> usize {
        info_set.player
    }

    fn encode(&self, _info_set: &MatrixInfoSet) -> Vec<f64> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_payoffs() {
        let game = MatrixGame::coordination();
        let root = game.initial_state();
        let s = game.advance(&root, 1).unwrap();
        assert_eq!(PlayerId::Player(1), game.node_player_id(&s));
        let s = game.advance(&s, 2).unwrap();
        assert!(game.is_terminal(&s));
        assert_eq!(vec![1.0, 1.0], game.utilities(&s));
    }

    #[test]
    fn test_rock_paper_scissors_is_zero_sum() {
        let game = MatrixGame::rock_paper_scissors();
        for a in 1..=3 {
            for b in 1..=3 {
                let s = game.advance(&game.initial_state(), a).unwrap();
                let s = game.advance(&s, b).unwrap();
                let u = game.utilities(&s);
                assert_eq!(0.0, u[0] + u[1]);
            }
        }
        // rock loses to paper
        let s = game.advance(&game.initial_state(), 1).unwrap();
        let s = game.advance(&s, 2).unwrap();
        assert_eq!(vec![-1.0, 1.0], game.utilities(&s));
    }

    #[test]
    fn test_second_player_cannot_see_first_move() {
        let game = MatrixGame::coordination();
        let a = game.advance(&game.initial_state(), 1).unwrap();
        let b = game.advance(&game.initial_state(), 2).unwrap();
        assert_eq!(game.information_set_key(&a, 1), game.information_set_key(&b, 1));
    }

    #[test]
    fn test_out_of_range_action() {
        let game = MatrixGame::coordination();
        assert!(game.advance(&game.initial_state(), 3).is_err());
        assert!(game.advance(&game.initial_state(), 0).is_err());
    }
}
