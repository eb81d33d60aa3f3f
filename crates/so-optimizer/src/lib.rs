//! # so-optimizer
//!
//! Orchestration core for simulation-based optimization.
//!
//! A search [`Algorithm`] proposes configurations, a [`ProblemDefinition`]
//! decides feasibility, objectives and when to stop, and one of two drivers
//! connects them to whatever executes the simulation model:
//!
//! - [`SequentialOptimizer`]: one configuration in flight, strict
//!   `next` / `execution_finished` alternation.
//! - [`ParallelOptimizer`]: many configurations in flight, results in any
//!   order, safe to share between worker threads.
//!
//! Both keep a result cache, replicate noisy configurations until the
//! replication criteria are met, maintain the Pareto front and collect
//! [`OptimizationStatistics`]. [`LocalExecutor`] with [`run_sequential`] and
//! [`run_parallel`] covers the in-process case.

mod cache;
mod config;
mod criteria;
mod engine;
mod executor;
mod parallel;
mod pareto;
mod problem;
mod record;
mod search;
mod sequential;
mod statistics;

#[cfg(test)]
mod testing;

pub use cache::{ConfigurationCache, KeyScheme, RENDERED_KEY_DELIMITER};
pub use config::{OptimizationId, OptimizerConfig, PostViolationCounting};
pub use criteria::{
    CancelCriterion, FactorRange, MaxConfigurations, MaxOptimizationTime, MaxSimulationRuns,
    MinRuns, ObjectiveTarget, PostConstraint, PreConstraint, ReplicationCriterion, ResponseRange,
};
pub use engine::{Dispatch, StopReason};
pub use executor::{
    run_parallel, run_sequential, Completion, FrontEntry, LocalExecutor, Model, RunSummary,
};
pub use parallel::{ParallelOptimizer, ResultDisposition};
pub use pareto::{pareto_dominance, ParetoFront};
pub use problem::{ProblemDefinition, SimpleProblem};
pub use record::ReplicationRecord;
pub use search::{
    Algorithm, FactorDef, FactorKind, GridSearch, PerturbationSearch, RandomSearch, SearchSpace,
};
pub use sequential::SequentialOptimizer;
pub use statistics::{
    rank_by_sum, BestEntry, OptimizationStatistics, StatisticsSnapshot, DEFAULT_BEST_CAPACITY,
};
