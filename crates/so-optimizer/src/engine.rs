//! Constraint, cache and finalization logic shared by both optimizer drivers.
//!
//! The drivers differ only in how they schedule work; everything that touches
//! statistics, the cache or the Pareto front goes through
//! [`EvaluationEngine`], so both execution models keep identical bookkeeping.

use serde::{Deserialize, Serialize};
use so_types::{failure_objectives, Configuration, OptError, OptResult, Responses, RunInfo};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::ConfigurationCache;
use crate::config::{OptimizationId, OptimizerConfig, PostViolationCounting};
use crate::pareto::ParetoFront;
use crate::problem::ProblemDefinition;
use crate::record::ReplicationRecord;
use crate::search::Algorithm;
use crate::statistics::OptimizationStatistics;

/// Why an optimizer stopped handing out configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A cancel criterion was satisfied by the current statistics.
    CancelCriterion { name: String },
    /// The search algorithm had nothing left to propose.
    AlgorithmExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CancelCriterion { name } => write!(f, "cancel criterion '{name}' satisfied"),
            Self::AlgorithmExhausted => write!(f, "algorithm exhausted"),
        }
    }
}

/// Outcome of asking an optimizer for work.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Execute this configuration and report back.
    Continue(Configuration),
    /// No further configuration is available.
    Terminate(StopReason),
}

impl Dispatch {
    pub fn configuration(&self) -> Option<&Configuration> {
        match self {
            Self::Continue(cfg) => Some(cfg),
            Self::Terminate(_) => None,
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate(_))
    }
}

pub(crate) struct EvaluationEngine<P> {
    run_id: OptimizationId,
    problem: P,
    cache: Option<ConfigurationCache>,
    statistics: OptimizationStatistics,
    front: ParetoFront,
    next_sequence: u64,
    post_violation_counting: PostViolationCounting,
    max_consecutive_rejections: Option<usize>,
    consecutive_rejections: usize,
}

impl<P: ProblemDefinition> EvaluationEngine<P> {
    pub(crate) fn new(
        problem: P,
        config: &OptimizerConfig,
        default_counting: PostViolationCounting,
    ) -> Self {
        Self {
            run_id: config.id,
            problem,
            cache: config
                .use_cache
                .then(|| ConfigurationCache::new(config.cache_keys)),
            statistics: OptimizationStatistics::new(config.best_capacity),
            front: ParetoFront::new(),
            next_sequence: 0,
            post_violation_counting: config
                .post_violation_counting
                .unwrap_or(default_counting),
            max_consecutive_rejections: config.max_consecutive_rejections,
            consecutive_rejections: 0,
        }
    }

    pub(crate) fn new_record(&mut self, configuration: Configuration) -> ReplicationRecord {
        let record = ReplicationRecord::new(configuration, self.next_sequence);
        self.next_sequence += 1;
        record
    }

    pub(crate) fn is_feasible(&self, configuration: &Configuration) -> bool {
        match self
            .problem
            .pre_constraints()
            .iter()
            .find(|c| !c.is_satisfied(configuration))
        {
            Some(violated) => {
                debug!(
                    run = %self.run_id,
                    configuration = %configuration,
                    constraint = violated.name(),
                    "pre-constraint violated"
                );
                false
            }
            None => true,
        }
    }

    /// Record an infeasible configuration as a synthetic +infinity run and
    /// finalize it right away, which also feeds it back to the algorithm.
    pub(crate) fn reject_infeasible<A: Algorithm + ?Sized>(
        &mut self,
        configuration: Configuration,
        algorithm: &mut A,
    ) -> OptResult<()> {
        self.statistics.record_pre_constraint_violation();
        let objectives = failure_objectives(self.problem.objective_names());
        let mut record = self.new_record(configuration.clone());
        record.add_run(RunInfo::infeasible(configuration, objectives));
        self.finalize(record, algorithm)?;
        Ok(())
    }

    /// Count a candidate that did not lead to a dispatch.
    pub(crate) fn note_rejection(&mut self) -> OptResult<()> {
        self.consecutive_rejections += 1;
        match self.max_consecutive_rejections {
            Some(max) if self.consecutive_rejections >= max => {
                Err(OptError::CandidateStarvation {
                    rejected: self.consecutive_rejections,
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn note_dispatch(&mut self) {
        self.consecutive_rejections = 0;
    }

    /// Working copy of the cached record for `configuration`, if caching is
    /// enabled and it has been finalized before.
    pub(crate) fn cached(&mut self, configuration: &Configuration) -> Option<ReplicationRecord> {
        let cached = self.cache.as_ref()?.get(configuration)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            run = %self.run_id,
            configuration = %configuration,
            stored_runs = cached.run_count(),
            "cache hit"
        );
        Some(ReplicationRecord::resume(&cached, sequence))
    }

    pub(crate) fn is_sufficient(&self, record: &ReplicationRecord) -> bool {
        self.problem
            .replication_criteria()
            .iter()
            .all(|c| c.is_sufficient(record))
    }

    /// Append one reported execution to `record`.
    ///
    /// Missing responses and post-constraint violations leave the run at
    /// +infinity; only the latter bump the violation counter, subject to the
    /// counting policy. The run is appended even when objective calculation
    /// fails, so the record stays finalizable; the error is returned after.
    pub(crate) fn record_run(
        &mut self,
        record: &mut ReplicationRecord,
        responses: Option<Responses>,
        runtime: Duration,
    ) -> OptResult<()> {
        let failed = failure_objectives(self.problem.objective_names());
        let mut run = RunInfo::executed(
            record.configuration().clone(),
            responses,
            failed,
            runtime,
        );

        if run.responses.is_none() {
            debug!(
                run = %self.run_id,
                configuration = %record.configuration(),
                "execution reported no responses"
            );
            record.add_run(run);
            return Ok(());
        }

        let violated = self
            .problem
            .post_constraints()
            .iter()
            .find(|c| !c.is_satisfied(&run));
        match violated {
            Some(constraint) => {
                debug!(
                    run = %self.run_id,
                    configuration = %record.configuration(),
                    constraint = constraint.name(),
                    from_cache = record.is_from_cache(),
                    "post-constraint violated"
                );
                if self.post_violation_counting.counts(record.is_from_cache()) {
                    self.statistics.record_post_constraint_violation();
                }
            }
            None => {
                let computed = run
                    .responses
                    .as_ref()
                    .map(|responses| {
                        self.problem
                            .calc_objectives(record.configuration(), responses)
                    })
                    .transpose();
                match computed {
                    Ok(Some(objectives)) => run.objectives = objectives,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            run = %self.run_id,
                            configuration = %record.configuration(),
                            error = %e,
                            "objective calculation failed, keeping run at +infinity"
                        );
                        record.add_run(run);
                        return Err(e);
                    }
                }
            }
        }

        record.add_run(run);
        Ok(())
    }

    /// Move a finished record into statistics, cache and Pareto front, then
    /// report its representative objectives to the algorithm.
    pub(crate) fn finalize<A: Algorithm + ?Sized>(
        &mut self,
        record: ReplicationRecord,
        algorithm: &mut A,
    ) -> OptResult<Arc<ReplicationRecord>> {
        let representative = self.problem.representative(&record)?;
        let record = record.finalize(representative.clone());
        let configuration = record.configuration();

        let problem = &self.problem;
        self.statistics
            .record(Arc::clone(&record), |a, b| problem.rank(a, b));
        if let Some(cache) = self.cache.as_mut() {
            cache.put(Arc::clone(&record));
        }
        let on_front = self
            .front
            .consider_for_front(configuration, &representative, |a, b| {
                problem.dominance(a, b)
            });

        debug!(
            run = %self.run_id,
            configuration = %configuration,
            runs = record.run_count(),
            failed_runs = record.failed_runs(),
            from_cache = record.is_from_cache(),
            on_front,
            "configuration finalized"
        );

        algorithm.add_results(configuration, &representative, &self.front);
        Ok(record)
    }

    /// First satisfied cancel criterion, if any.
    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        let criterion = self
            .problem
            .cancel_criteria()
            .iter()
            .find(|c| c.should_stop(&self.statistics))?;
        let reason = StopReason::CancelCriterion {
            name: criterion.name().to_string(),
        };
        info!(
            run = %self.run_id,
            reason = %reason,
            evaluated = self.statistics.history().len(),
            simulation_runs = self.statistics.total_simulation_runs(),
            "optimization terminated"
        );
        Some(reason)
    }

    pub(crate) fn run_id(&self) -> OptimizationId {
        self.run_id
    }

    pub(crate) fn problem(&self) -> &P {
        &self.problem
    }

    pub(crate) fn statistics(&self) -> &OptimizationStatistics {
        &self.statistics
    }

    pub(crate) fn front(&self) -> &ParetoFront {
        &self.front
    }

    pub(crate) fn cache(&self) -> Option<&ConfigurationCache> {
        self.cache.as_ref()
    }
}
