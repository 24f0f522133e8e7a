use std::fmt::Display;

use crate::games::ActionId;

/// Raised by a game definition when it cannot produce the next game state.
#[derive(Debug, Clone, PartialEq)]
pub struct GameDefinitionError {
    pub path: Vec<ActionId>,
    pub message: String,
}

impl GameDefinitionError {
    pub fn new(path: &[ActionId], message: impl Into<String>) -> Self {
        GameDefinitionError {
            path: path.to_vec(),
            message: message.into(),
        }
    }
}

impl Display for GameDefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "game definition failed at {:?}: {}", self.path, self.message)
    }
}

impl std::error::Error for GameDefinitionError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The game definition failed while a trajectory was being resolved.
    GameDefinition(GameDefinitionError),
    /// A policy computation produced a non-finite probability.
    NumericInstability {
        context: String,
        values: Vec<f64>,
    },
    /// The accelerated backend cannot service a call.
    BackendUnavailable(String),
    /// Every trajectory of an iteration failed.
    AllTrajectoriesFailed {
        iteration: usize,
        failures: usize,
    },
}

impl SolverError {
    pub fn numeric(context: impl Into<String>, values: &[f64]) -> Self {
        SolverError::NumericInstability {
            context: context.into(),
            values: values.to_vec(),
        }
    }

    /// Errors that only abort the trajectory they occurred in.
    pub fn is_trajectory_local(&self) -> bool {
        matches!(self, SolverError::GameDefinition(_))
    }
}

impl From<GameDefinitionError> for SolverError {
    fn from(err: GameDefinitionError) -> Self {
        SolverError::GameDefinition(err)
    }
}

impl Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::GameDefinition(e) => write!(f, "{}", e),
            SolverError::NumericInstability {
                context,
                values,
            } => {
                write!(f, "numeric instability in {}: {:?}", context, values)
            }
            SolverError::BackendUnavailable(reason) => {
                write!(f, "accelerated backend unavailable: {}", reason)
            }
            SolverError::AllTrajectoriesFailed {
                iteration,
                failures,
            } => {
                write!(f, "all {} trajectories of iteration {} failed", failures, iteration)
            }
        }
    }
}

impl std::error::Error for SolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolverError::GameDefinition(e) => Some(e),
            _ => None,
        }
    }
}

/// Checks that every entry of a probability vector is finite.
pub fn ensure_finite(context: &str, values: &[f64]) -> Result<(), SolverError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolverError::numeric(context, values))
    }
}
