//! Counterfactual regret minimization for imperfect-information games.
//!
//! [`solvers::cfr::Trainer`] keeps an explicit regret table,
//! [`solvers::deep::DeepTrainer`] replaces it with a regressor. Both walk the tree
//! through a shared [`navigator::Navigator`] and run trajectories on a
//! [`pipeline::Pipeline`].

pub mod backend;
pub mod error;
pub mod eval;
pub mod games;
pub mod navigator;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod solvers;

pub use error::{
    GameDefinitionError,
    SolverError,
};
pub use games::{
    ActionId,
    GameDefinition,
    InformationEncoder,
    PlayerId,
};
pub use solvers::{
    cfr::Trainer,
    deep::{
        DeepCheckpoint,
        DeepTrainer,
    },
    RunSummary,
    Solver,
    SolverOptions,
    TraversalMode,
};
