use anyhow::Context;
use rand::Rng;
use so_optimizer::{
    run_parallel, FactorRange, LocalExecutor, MaxSimulationRuns, MinRuns, OptimizerConfig,
    ParallelOptimizer, PerturbationSearch, SearchSpace, SimpleProblem,
};
use so_types::{Configuration, Responses};
use tracing_subscriber::EnvFilter;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

/// Two noisy quadratic bowls with different minima.
fn noisy_bowls(configuration: &Configuration) -> Option<Responses> {
    let x = configuration.get_f64("x")?;
    let y = configuration.get_f64("y")?;
    let mut rng = rand::rng();
    let mut noise = || rng.random_range(-0.05..0.05);

    let mut responses = Responses::new();
    responses.insert("f1".into(), x * x + y * y + noise());
    responses.insert("f2".into(), (x - 2.0).powi(2) + (y - 1.0).powi(2) + noise());
    Some(responses)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let concurrency: usize = env_or("SO_CONCURRENCY", 4)?;
    let budget: u64 = env_or("SO_BUDGET", 300)?;
    let seed: Option<u64> = std::env::var("SO_SEED")
        .ok()
        .map(|raw| raw.parse().with_context(|| format!("invalid SO_SEED: {raw}")))
        .transpose()?;

    let space = SearchSpace::new()
        .add_float("x", -6.0, 6.0)
        .add_float("y", -6.0, 6.0);
    let algorithm = match seed {
        Some(seed) => PerturbationSearch::with_seed(space, 0.3, seed)?,
        None => PerturbationSearch::new(space, 0.3)?,
    };

    let problem = SimpleProblem::minimize_responses(["f1", "f2"])
        .with_pre_constraint(FactorRange::new("x", -5.0, 5.0))
        .with_pre_constraint(FactorRange::new("y", -5.0, 5.0))
        .with_replication_criterion(MinRuns(3))
        .with_cancel_criterion(MaxSimulationRuns(budget));

    let config = OptimizerConfig::new("noisy-bowls")
        .with_concurrency(concurrency)
        .with_max_consecutive_rejections(10_000);
    let optimizer = ParallelOptimizer::new(config, algorithm, problem)?;
    let executor = LocalExecutor::new(noisy_bowls, concurrency)?;

    let summary = run_parallel(&optimizer, &executor)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
