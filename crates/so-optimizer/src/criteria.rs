//! Predicates consumed by the optimizer: pre-/post-constraints, cancel
//! criteria and replication sufficiency.
//!
//! Every trait is implemented for matching closures, so ad-hoc predicates can
//! be passed straight in. The named types below cover the common cases and
//! report a readable name in logs.

use so_types::{Configuration, RunInfo};
use std::time::Duration;

use crate::record::ReplicationRecord;
use crate::statistics::OptimizationStatistics;

/// Feasibility check on a configuration before it is executed.
pub trait PreConstraint: Send + Sync {
    fn is_satisfied(&self, configuration: &Configuration) -> bool;

    fn name(&self) -> &str {
        "pre-constraint"
    }
}

/// Feasibility check on an observed run after execution.
pub trait PostConstraint: Send + Sync {
    fn is_satisfied(&self, run: &RunInfo) -> bool;

    fn name(&self) -> &str {
        "post-constraint"
    }
}

/// Predicate over accumulated statistics that ends the optimization run.
pub trait CancelCriterion: Send + Sync {
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool;

    fn name(&self) -> &str {
        "cancel-criterion"
    }
}

/// Decides whether a configuration has been replicated often enough.
pub trait ReplicationCriterion: Send + Sync {
    fn is_sufficient(&self, record: &ReplicationRecord) -> bool;

    fn name(&self) -> &str {
        "replication-criterion"
    }
}

impl<F> PreConstraint for F
where
    F: Fn(&Configuration) -> bool + Send + Sync,
{
    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        self(configuration)
    }
}

impl<F> PostConstraint for F
where
    F: Fn(&RunInfo) -> bool + Send + Sync,
{
    fn is_satisfied(&self, run: &RunInfo) -> bool {
        self(run)
    }
}

impl<F> CancelCriterion for F
where
    F: Fn(&OptimizationStatistics) -> bool + Send + Sync,
{
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool {
        self(statistics)
    }
}

impl<F> ReplicationCriterion for F
where
    F: Fn(&ReplicationRecord) -> bool + Send + Sync,
{
    fn is_sufficient(&self, record: &ReplicationRecord) -> bool {
        self(record)
    }
}

// ---------------------------------------------------------------------------
// Pre-constraints
// ---------------------------------------------------------------------------

/// Numeric factor must lie in `[min, max]`. Missing or non-numeric factors
/// fail the check.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorRange {
    pub factor: String,
    pub min: f64,
    pub max: f64,
}

impl FactorRange {
    pub fn new(factor: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            factor: factor.into(),
            min,
            max,
        }
    }
}

impl PreConstraint for FactorRange {
    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        configuration
            .get_f64(&self.factor)
            .is_some_and(|v| v >= self.min && v <= self.max)
    }

    fn name(&self) -> &str {
        "factor-range"
    }
}

// ---------------------------------------------------------------------------
// Post-constraints
// ---------------------------------------------------------------------------

/// Observed response must lie in `[min, max]`. Runs without that response
/// fail the check.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRange {
    pub response: String,
    pub min: f64,
    pub max: f64,
}

impl ResponseRange {
    pub fn new(response: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            response: response.into(),
            min,
            max,
        }
    }
}

impl PostConstraint for ResponseRange {
    fn is_satisfied(&self, run: &RunInfo) -> bool {
        run.response(&self.response)
            .is_some_and(|v| v >= self.min && v <= self.max)
    }

    fn name(&self) -> &str {
        "response-range"
    }
}

// ---------------------------------------------------------------------------
// Cancel criteria
// ---------------------------------------------------------------------------

/// Stop once this many configurations have been finalized (fresh, cached and
/// infeasible alike).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxConfigurations(pub usize);

impl CancelCriterion for MaxConfigurations {
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool {
        statistics.history().len() >= self.0
    }

    fn name(&self) -> &str {
        "max-configurations"
    }
}

/// Stop once this many simulation runs have been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxSimulationRuns(pub u64);

impl CancelCriterion for MaxSimulationRuns {
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool {
        statistics.total_simulation_runs() >= self.0
    }

    fn name(&self) -> &str {
        "max-simulation-runs"
    }
}

/// Stop once the summed simulation runtime reaches the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxOptimizationTime(pub Duration);

impl CancelCriterion for MaxOptimizationTime {
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool {
        statistics.total_optimization_time() >= self.0
    }

    fn name(&self) -> &str {
        "max-optimization-time"
    }
}

/// Stop once the best record reaches `target` or lower on one objective.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveTarget {
    pub objective: String,
    pub target: f64,
}

impl ObjectiveTarget {
    pub fn new(objective: impl Into<String>, target: f64) -> Self {
        Self {
            objective: objective.into(),
            target,
        }
    }
}

impl CancelCriterion for ObjectiveTarget {
    fn should_stop(&self, statistics: &OptimizationStatistics) -> bool {
        statistics.history().iter().any(|r| {
            r.representative()
                .and_then(|o| o.get(&self.objective))
                .is_some_and(|v| *v <= self.target)
        })
    }

    fn name(&self) -> &str {
        "objective-target"
    }
}

// ---------------------------------------------------------------------------
// Replication criteria
// ---------------------------------------------------------------------------

/// Sufficient once the record holds at least this many runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinRuns(pub usize);

impl ReplicationCriterion for MinRuns {
    fn is_sufficient(&self, record: &ReplicationRecord) -> bool {
        record.run_count() >= self.0
    }

    fn name(&self) -> &str {
        "min-runs"
    }
}
