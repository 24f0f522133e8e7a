use cfr_engine::{
    games::{
        kuhn::Kuhn,
        matrix::MatrixGame,
    },
    policy::UpdateRuleKind,
    DeepTrainer,
    Solver,
    SolverOptions,
    Trainer,
    TraversalMode,
};
use criterion::{
    black_box,
    criterion_group,
    criterion_main,
    Criterion,
};

fn cfr_kuhn_train_benchmark(c: &mut Criterion) {
    let mut trainer = Trainer::new(Kuhn);
    let options = SolverOptions::default();
    c.bench_function("cfr::train<kuhn> 10", |b| {
        b.iter(|| trainer.run_iterations(black_box(10), &options));
    });
}

fn cfr_plus_kuhn_accelerated_benchmark(c: &mut Criterion) {
    let mut trainer = Trainer::new(Kuhn);
    let options = SolverOptions {
        update_rule: UpdateRuleKind::RegretMatchingPlus,
        prefer_accelerated: true,
        ..Default::default()
    };
    c.bench_function("cfr+::train<kuhn> accelerated 10", |b| {
        b.iter(|| trainer.run_iterations(black_box(10), &options));
    });
}

fn mccfr_kuhn_parallel_benchmark(c: &mut Criterion) {
    let mut trainer = Trainer::new(Kuhn);
    let options = SolverOptions {
        parallel: true,
        traversal: TraversalMode::Sampled {
            trajectories: 256,
        },
        ..Default::default()
    };
    c.bench_function("mccfr::train<kuhn> parallel 256x10", |b| {
        b.iter(|| trainer.run_iterations(black_box(10), &options));
    });
}

fn deep_coordination_benchmark(c: &mut Criterion) {
    let options = SolverOptions {
        refit_interval: 1,
        traversal: TraversalMode::Sampled {
            trajectories: 64,
        },
        ..Default::default()
    };
    let mut trainer = DeepTrainer::new(MatrixGame::coordination(), &options);
    c.bench_function("deep::train<coordination> 64x10", |b| {
        b.iter(|| trainer.run_iterations(black_box(10), &options));
    });
}

criterion_group!(
    cfr_benches,
    cfr_kuhn_train_benchmark,
    cfr_plus_kuhn_accelerated_benchmark,
    mccfr_kuhn_parallel_benchmark,
    deep_coordination_benchmark
);
criterion_main!(cfr_benches);
