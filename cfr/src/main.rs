use std::path::{
    Path,
    PathBuf,
};

use anyhow::Context;
use clap::{
    Parser,
    Subcommand,
    ValueEnum,
    ValueHint,
};
use log::info;
use serde::Serialize;

use cfr_engine::{
    games::{
        self,
        GameDefinition,
        InformationEncoder,
    },
    solvers::{
        self,
        Solver,
        SolverArgs,
        SolverOptions,
    },
};

#[derive(Parser)]
struct AppArgs {
    #[clap(long, short, value_enum)]
    game: Game,

    /// Write the final table (tabular) or a resumable checkpoint (deep) as JSON.
    #[clap(long, value_parser, value_hint(ValueHint::FilePath))]
    export: Option<PathBuf>,

    #[clap(subcommand)]
    solver: SolverKind,
}

#[derive(Subcommand)]
enum SolverKind {
    Tabular(SolverArgs),
    Deep(SolverArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Game {
    Kuhn,
    Coordination,
    RockPaperScissors,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

fn run_tabular<G: GameDefinition>(
    game: G,
    args: &SolverArgs,
    options: &SolverOptions,
    export: Option<&Path>,
) -> anyhow::Result<()> {
    let mut trainer = solvers::cfr::Trainer::new(game);
    let summary = trainer.run_iterations(args.iterations, options).context("training failed")?;
    info!("{}", summary);
    trainer.print_strategy();
    info!("exploitability: {}", trainer.exploitability()?);
    if let Some(path) = export {
        write_json(path, &trainer.snapshot())?;
    }
    Ok(())
}

fn run_deep<G: InformationEncoder>(
    game: G,
    args: &SolverArgs,
    options: &SolverOptions,
    export: Option<&Path>,
) -> anyhow::Result<()> {
    let mut trainer = solvers::deep::DeepTrainer::new(game, options);
    let summary = trainer.run_iterations(args.iterations, options).context("training failed")?;
    info!("{}", summary);
    trainer.print_strategy();
    info!("exploitability: {}", trainer.exploitability()?);
    if let Some(path) = export {
        write_json(path, &trainer.checkpoint())?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize env_logger with a default log level of INFO.
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = AppArgs::parse();
    let export = args.export.as_deref();
    match &args.solver {
        SolverKind::Tabular(solver_args) => {
            let options = solver_args.to_options();
            match args.game {
                Game::Kuhn => run_tabular(games::kuhn::Kuhn, solver_args, &options, export),
                Game::Coordination => {
                    let game = games::matrix::MatrixGame::coordination();
                    run_tabular(game, solver_args, &options, export)
                }
                Game::RockPaperScissors => {
                    let game = games::matrix::MatrixGame::rock_paper_scissors();
                    run_tabular(game, solver_args, &options, export)
                }
            }
        }
        SolverKind::Deep(solver_args) => {
            let options = solver_args.to_options();
            match args.game {
                Game::Kuhn => run_deep(games::kuhn::Kuhn, solver_args, &options, export),
                Game::Coordination => {
                    let game = games::matrix::MatrixGame::coordination();
                    run_deep(game, solver_args, &options, export)
                }
                Game::RockPaperScissors => {
                    let game = games::matrix::MatrixGame::rock_paper_scissors();
                    run_deep(game, solver_args, &options, export)
                }
            }
        }
    }
}
