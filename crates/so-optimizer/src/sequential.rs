//! One-configuration-at-a-time optimization loop.

use so_types::{Configuration, OptError, OptResult, Responses};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::ConfigurationCache;
use crate::config::{OptimizerConfig, PostViolationCounting};
use crate::engine::{Dispatch, EvaluationEngine, StopReason};
use crate::pareto::ParetoFront;
use crate::problem::ProblemDefinition;
use crate::record::ReplicationRecord;
use crate::search::Algorithm;
use crate::statistics::OptimizationStatistics;

/// Sequential optimizer: exactly one configuration is in flight at a time.
///
/// This is a single-writer design. `next()` and `execution_finished()` must
/// strictly alternate; a second `next()` before the dispatched configuration
/// reports back fails with [`OptError::NotReentrant`]. There is no internal
/// locking.
///
/// Cache hits are treated as zero-cost re-evaluations: the stored record is
/// finalized again (counted as found in storage) and the loop moves on without
/// dispatching anything.
pub struct SequentialOptimizer<A, P> {
    config: OptimizerConfig,
    algorithm: A,
    engine: EvaluationEngine<P>,
    current: Option<ReplicationRecord>,
    awaiting_result: bool,
    terminated: Option<StopReason>,
}

impl<A: Algorithm, P: ProblemDefinition> SequentialOptimizer<A, P> {
    /// Post-constraint violations are only counted for fresh records.
    pub const DEFAULT_POST_VIOLATION_COUNTING: PostViolationCounting =
        PostViolationCounting::FreshOnly;

    pub fn new(config: OptimizerConfig, algorithm: A, problem: P) -> OptResult<Self> {
        config.validate()?;
        let engine =
            EvaluationEngine::new(problem, &config, Self::DEFAULT_POST_VIOLATION_COUNTING);
        info!(
            run = %config.id,
            name = %config.name,
            algorithm = algorithm.name(),
            cache = config.use_cache,
            "sequential optimizer created"
        );
        Ok(Self {
            config,
            algorithm,
            engine,
            current: None,
            awaiting_result: false,
            terminated: None,
        })
    }

    /// Next configuration to execute.
    ///
    /// Finalizes the previously executed configuration (unless it still needs
    /// replication, in which case it is handed out again), checks the cancel
    /// criteria, then draws candidates until one is feasible and not already
    /// answered by the cache.
    pub fn next(&mut self) -> OptResult<Dispatch> {
        if let Some(reason) = &self.terminated {
            return Ok(Dispatch::Terminate(reason.clone()));
        }
        if self.awaiting_result {
            return Err(OptError::NotReentrant);
        }

        if let Some(record) = self.current.take() {
            if !self.engine.is_sufficient(&record) {
                debug!(
                    run = %self.engine.run_id(),
                    configuration = %record.configuration(),
                    runs = record.run_count(),
                    "replicating"
                );
                return Ok(self.dispatch(record));
            }
            self.engine.finalize(record, &mut self.algorithm)?;
        }

        loop {
            if let Some(reason) = self.engine.stop_reason() {
                return Ok(self.terminate(reason));
            }

            let Some(candidate) = self.algorithm.next_configuration()? else {
                info!(run = %self.engine.run_id(), "algorithm exhausted");
                return Ok(self.terminate(StopReason::AlgorithmExhausted));
            };

            if !self.engine.is_feasible(&candidate) {
                self.engine
                    .reject_infeasible(candidate, &mut self.algorithm)?;
                self.engine.note_rejection()?;
                continue;
            }

            if let Some(cached) = self.engine.cached(&candidate) {
                if self.engine.is_sufficient(&cached) {
                    self.engine.finalize(cached, &mut self.algorithm)?;
                    self.engine.note_rejection()?;
                    continue;
                }
                return Ok(self.dispatch(cached));
            }

            let record = self.engine.new_record(candidate);
            return Ok(self.dispatch(record));
        }
    }

    /// Report the outcome of the dispatched configuration. `responses` is
    /// `None` when the execution failed.
    pub fn execution_finished(
        &mut self,
        responses: Option<Responses>,
        runtime: Duration,
    ) -> OptResult<()> {
        if !self.awaiting_result {
            return Err(OptError::NoDispatch);
        }
        let record = self.current.as_mut().ok_or(OptError::NoDispatch)?;
        self.awaiting_result = false;
        self.engine.record_run(record, responses, runtime)
    }

    fn dispatch(&mut self, record: ReplicationRecord) -> Dispatch {
        let configuration = record.configuration().clone();
        self.current = Some(record);
        self.awaiting_result = true;
        self.engine.note_dispatch();
        Dispatch::Continue(configuration)
    }

    fn terminate(&mut self, reason: StopReason) -> Dispatch {
        self.terminated = Some(reason.clone());
        Dispatch::Terminate(reason)
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn statistics(&self) -> &OptimizationStatistics {
        self.engine.statistics()
    }

    pub fn pareto_front(&self) -> &ParetoFront {
        self.engine.front()
    }

    /// `None` when caching is disabled.
    pub fn cache(&self) -> Option<&ConfigurationCache> {
        self.engine.cache()
    }

    /// Configuration currently dispatched or awaiting finalization.
    pub fn current_configuration(&self) -> Option<&Configuration> {
        self.current.as_ref().map(ReplicationRecord::configuration)
    }

    pub fn is_awaiting_result(&self) -> bool {
        self.awaiting_result
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.terminated.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    pub fn problem(&self) -> &P {
        self.engine.problem()
    }
}
