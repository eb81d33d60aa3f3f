//! Outcome of a single execution attempt of a configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::factor::Configuration;

/// Observed simulation outputs, keyed by response name.
pub type Responses = BTreeMap<String, f64>;

/// Objective values, keyed by objective name. Smaller is better.
pub type ObjectiveMap = BTreeMap<String, f64>;

/// Build the +infinity objective vector used for failed or infeasible runs.
pub fn failure_objectives<I, S>(names: I) -> ObjectiveMap
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(|name| (name.into(), f64::INFINITY))
        .collect()
}

/// How a run came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunKind {
    /// The execution backend ran the simulation and reported back.
    Executed,
    /// Synthetic record for a configuration rejected before execution.
    Infeasible,
}

/// One evaluation outcome for a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub configuration: Configuration,
    /// `None` when the execution failed or never happened.
    pub responses: Option<Responses>,
    pub objectives: ObjectiveMap,
    pub runtime: Duration,
    pub kind: RunKind,
    pub recorded_at: DateTime<Utc>,
}

impl RunInfo {
    /// A run reported by the execution backend. Objectives start at +infinity
    /// and are filled in once post-constraints pass.
    pub fn executed(
        configuration: Configuration,
        responses: Option<Responses>,
        objectives: ObjectiveMap,
        runtime: Duration,
    ) -> Self {
        Self {
            configuration,
            responses,
            objectives,
            runtime,
            kind: RunKind::Executed,
            recorded_at: Utc::now(),
        }
    }

    /// Synthetic failed run for a configuration that violated a pre-constraint.
    pub fn infeasible(configuration: Configuration, objectives: ObjectiveMap) -> Self {
        Self {
            configuration,
            responses: None,
            objectives,
            runtime: Duration::ZERO,
            kind: RunKind::Infeasible,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_executed(&self) -> bool {
        self.kind == RunKind::Executed
    }

    /// True when every objective is +infinity (failed, infeasible, or rejected
    /// by a post-constraint). A run without objectives is not a failure.
    pub fn is_failure(&self) -> bool {
        !self.objectives.is_empty() && self.objectives.values().all(|v| *v == f64::INFINITY)
    }

    pub fn response(&self, name: &str) -> Option<f64> {
        self.responses.as_ref().and_then(|r| r.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_vector_covers_every_objective() {
        let objectives = failure_objectives(["cost", "latency"]);
        assert_eq!(objectives.len(), 2);
        assert!(objectives.values().all(|v| v.is_infinite() && *v > 0.0));
    }

    #[test]
    fn infeasible_run_has_no_responses_and_zero_runtime() {
        let cfg = Configuration::new().with("x", -1);
        let run = RunInfo::infeasible(cfg.clone(), failure_objectives(["f"]));
        assert_eq!(run.configuration, cfg);
        assert!(run.responses.is_none());
        assert_eq!(run.runtime, Duration::ZERO);
        assert!(!run.is_executed());
        assert!(run.is_failure());
    }

    #[test]
    fn executed_run_exposes_responses() {
        let mut responses = Responses::new();
        responses.insert("throughput".into(), 42.0);
        let mut objectives = ObjectiveMap::new();
        objectives.insert("f".into(), 1.5);

        let run = RunInfo::executed(
            Configuration::new().with("x", 2),
            Some(responses),
            objectives,
            Duration::from_millis(250),
        );
        assert!(run.is_executed());
        assert!(!run.is_failure());
        assert_eq!(run.response("throughput"), Some(42.0));
        assert_eq!(run.response("missing"), None);
    }

    #[test]
    fn run_without_objectives_is_not_a_failure() {
        let run = RunInfo::executed(
            Configuration::new().with("x", 1),
            None,
            ObjectiveMap::new(),
            Duration::ZERO,
        );
        assert!(!run.is_failure());
    }
}
