use cfr_engine::{
    games::{
        matrix::{
            MatrixGame,
            MatrixInfoSet,
            MatrixState,
        },
        ActionId,
        GameDefinition,
        InformationEncoder,
        PlayerId,
    },
    policy::UpdateRuleKind,
    DeepTrainer,
    GameDefinitionError,
    Solver,
    SolverError,
    SolverOptions,
    Trainer,
    TraversalMode,
};
use more_asserts::{
    assert_gt,
    assert_lt,
};

/// Coordination game whose payoff is replaced at `cell`, or at every cell when `cell` is
/// `None`.
#[derive(Debug, Clone)]
struct Rigged {
    inner: MatrixGame,
    cell: Option<(ActionId, ActionId)>,
    payoff: Vec<f64>,
}

impl Rigged {
    fn new(cell: Option<(ActionId, ActionId)>, payoff: Vec<f64>) -> Self {
        Rigged {
            inner: MatrixGame::coordination(),
            cell,
            payoff,
        }
    }
}

impl GameDefinition for Rigged {
    type State = MatrixState;
    type InfoSet = MatrixInfoSet;

    fn num_players(&self) -> usize {
        self.inner.num_players()
    }

    fn initial_state(&self) -> MatrixState {
        self.inner.initial_state()
    }

    fn node_player_id(&self, state: &MatrixState) -> PlayerId {
        self.inner.node_player_id(state)
    }

    fn is_terminal(&self, state: &MatrixState) -> bool {
        self.inner.is_terminal(state)
    }

    fn legal_actions(&self, state: &MatrixState) -> Vec<ActionId> {
        self.inner.legal_actions(state)
    }

    fn chance_actions(&self, state: &MatrixState) -> Vec<(ActionId, f64)> {
        self.inner.chance_actions(state)
    }

    fn advance(
        &self,
        state: &MatrixState,
        action: ActionId,
    ) -> Result<MatrixState, GameDefinitionError> {
        self.inner.advance(state, action)
    }

    fn utilities(&self, state: &MatrixState) -> Vec<f64> {
        match (self.cell, state.row, state.col) {
            (None, _, _) => self.payoff.clone(),
            (Some(cell), Some(row), Some(col)) if cell == (row, col) => self.payoff.clone(),
            _ => self.inner.utilities(state),
        }
    }

    fn information_set_key(&self, state: &MatrixState, player: usize) -> MatrixInfoSet {
        self.inner.information_set_key(state, player)
    }
}

impl InformationEncoder for Rigged {
    fn decision_index(&self, info_set: &MatrixInfoSet) -> usize {
        self.inner.decision_index(info_set)
    }

    fn encode(&self, info_set: &MatrixInfoSet) -> Vec<f64> {
        self.inner.encode(info_set)
    }
}

#[test]
fn short_utilities_fail_only_their_trajectories() {
    for parallel in [false, true] {
        let mut trainer = Trainer::new(Rigged::new(Some((2, 2)), vec![1.0]));
        let options = SolverOptions {
            parallel,
            threads: 4,
            traversal: TraversalMode::Sampled {
                trajectories: 64,
            },
            ..Default::default()
        };
        let summary = trainer.run_iterations(3, &options).unwrap();
        assert_eq!(3, summary.iterations);
        assert_gt!(summary.total_failures(), 0);
        assert_lt!(summary.total_failures(), 3 * 64);
    }
}

#[test]
fn short_utilities_everywhere_abort_the_run() {
    for parallel in [false, true] {
        for prefer_accelerated in [false, true] {
            let mut trainer = Trainer::new(Rigged::new(None, vec![1.0]));
            let options = SolverOptions {
                parallel,
                threads: 2,
                prefer_accelerated,
                ..Default::default()
            };
            let err = trainer.run_iterations(1, &options).unwrap_err();
            assert_eq!(
                SolverError::AllTrajectoriesFailed {
                    iteration: 0,
                    failures: 2
                },
                err
            );
            assert_eq!(0, trainer.iteration());
        }
    }

    let options = SolverOptions {
        parallel: true,
        threads: 2,
        traversal: TraversalMode::Sampled {
            trajectories: 8,
        },
        ..Default::default()
    };
    let mut trainer = DeepTrainer::new(Rigged::new(None, vec![1.0, 2.0, 3.0]), &options);
    let err = trainer.run_iterations(1, &options).unwrap_err();
    assert_eq!(
        SolverError::AllTrajectoriesFailed {
            iteration: 0,
            failures: 8
        },
        err
    );
}

#[test]
fn non_finite_payoffs_are_fatal() {
    let rules = [
        UpdateRuleKind::RegretMatching,
        UpdateRuleKind::RegretMatchingPlus,
        UpdateRuleKind::Discounted,
    ];
    for update_rule in rules {
        for prefer_accelerated in [false, true] {
            let mut trainer = Trainer::new(Rigged::new(None, vec![f64::NAN, f64::NAN]));
            let options = SolverOptions {
                update_rule,
                prefer_accelerated,
                ..Default::default()
            };
            let err = trainer.run_iterations(5, &options).unwrap_err();
            assert!(
                matches!(err, SolverError::NumericInstability { .. }),
                "{:?} accelerated={}: {}",
                update_rule,
                prefer_accelerated,
                err
            );
            assert_eq!(0, trainer.iteration());
        }
    }
}
