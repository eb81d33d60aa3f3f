//! Concurrent dispatch/collect optimization loop.

use parking_lot::Mutex;
use so_types::{Configuration, OptResult, Responses};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{OptimizerConfig, PostViolationCounting};
use crate::engine::{Dispatch, EvaluationEngine, StopReason};
use crate::pareto::ParetoFront;
use crate::problem::ProblemDefinition;
use crate::record::ReplicationRecord;
use crate::search::Algorithm;
use crate::statistics::{OptimizationStatistics, StatisticsSnapshot};

/// What happened to a reported execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultDisposition {
    /// The record needs more runs and was queued for re-dispatch.
    Replicating,
    /// The record was finalized.
    Finalized,
    /// No matching configuration was running; the result was ignored.
    Dropped,
}

#[derive(Debug)]
struct InFlight {
    record: ReplicationRecord,
    dispatched_at: Instant,
}

struct ParallelState<A, P> {
    algorithm: A,
    engine: EvaluationEngine<P>,
    running: Vec<InFlight>,
    waiting: VecDeque<ReplicationRecord>,
    terminated: Option<StopReason>,
}

/// Parallel optimizer: many configurations in flight, results in any order.
///
/// All shared state (running list, replication queue, cache, statistics and
/// Pareto front) lives behind one mutex, and every public operation runs as a
/// single critical section. The optimizer can be shared across worker threads
/// behind an `Arc`.
///
/// Unlike the sequential driver, a cache hit never reaches the executor: its
/// stored objectives are fed to the algorithm and another candidate is drawn.
pub struct ParallelOptimizer<A, P> {
    config: OptimizerConfig,
    state: Mutex<ParallelState<A, P>>,
}

impl<A: Algorithm, P: ProblemDefinition> ParallelOptimizer<A, P> {
    /// Post-constraint violations are only counted for records resumed from
    /// the cache.
    pub const DEFAULT_POST_VIOLATION_COUNTING: PostViolationCounting =
        PostViolationCounting::CachedOnly;

    pub fn new(config: OptimizerConfig, algorithm: A, problem: P) -> OptResult<Self> {
        config.validate()?;
        let engine =
            EvaluationEngine::new(problem, &config, Self::DEFAULT_POST_VIOLATION_COUNTING);
        info!(
            run = %config.id,
            name = %config.name,
            algorithm = algorithm.name(),
            cache = config.use_cache,
            concurrency = config.concurrency,
            "parallel optimizer created"
        );
        Ok(Self {
            config,
            state: Mutex::new(ParallelState {
                algorithm,
                engine,
                running: Vec::new(),
                waiting: VecDeque::new(),
                terminated: None,
            }),
        })
    }

    /// Next configuration to execute.
    ///
    /// Records waiting for more replication are served first. Otherwise
    /// candidates are drawn until one is feasible, not already running, and
    /// not fully answered by the cache.
    ///
    /// Termination by a cancel criterion is permanent. Exhaustion of the
    /// algorithm is not: records that later need replication are still
    /// handed out.
    pub fn next(&self) -> OptResult<Dispatch> {
        self.state.lock().next()
    }

    /// Report a result for a running configuration, in any order.
    pub fn execution_finished(
        &self,
        configuration: &Configuration,
        responses: Option<Responses>,
        runtime: Duration,
    ) -> OptResult<ResultDisposition> {
        self.state
            .lock()
            .execution_finished(configuration, responses, runtime)
    }

    /// Remove running configurations dispatched at least `older_than` ago and
    /// return them. Their results, should they still arrive, are dropped.
    pub fn reap_stale(&self, older_than: Duration) -> Vec<Configuration> {
        let mut state = self.state.lock();
        let run_id = state.engine.run_id();
        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut state.running)
            .into_iter()
            .partition(|f| f.dispatched_at.elapsed() >= older_than);
        state.running = fresh;

        stale
            .into_iter()
            .map(|f| {
                warn!(
                    run = %run_id,
                    configuration = %f.record.configuration(),
                    in_flight_for = ?f.dispatched_at.elapsed(),
                    "reaping stale execution"
                );
                f.record.configuration().clone()
            })
            .collect()
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run `f` against the statistics while holding the lock.
    pub fn with_statistics<R>(&self, f: impl FnOnce(&OptimizationStatistics) -> R) -> R {
        f(self.state.lock().engine.statistics())
    }

    pub fn statistics_snapshot(&self) -> StatisticsSnapshot {
        self.with_statistics(OptimizationStatistics::snapshot)
    }

    pub fn pareto_front(&self) -> ParetoFront {
        self.state.lock().engine.front().clone()
    }

    pub fn is_cached(&self, configuration: &Configuration) -> bool {
        self.state
            .lock()
            .engine
            .cache()
            .is_some_and(|c| c.contains(configuration))
    }

    pub fn running_configurations(&self) -> Vec<Configuration> {
        self.state
            .lock()
            .running
            .iter()
            .map(|f| f.record.configuration().clone())
            .collect()
    }

    pub fn waiting_configurations(&self) -> Vec<Configuration> {
        self.state
            .lock()
            .waiting
            .iter()
            .map(|r| r.configuration().clone())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.lock().terminated.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated.is_some()
    }
}

impl<A: Algorithm, P: ProblemDefinition> ParallelState<A, P> {
    fn next(&mut self) -> OptResult<Dispatch> {
        if let Some(reason) = &self.terminated {
            return Ok(Dispatch::Terminate(reason.clone()));
        }
        if let Some(reason) = self.engine.stop_reason() {
            return Ok(self.terminate(reason));
        }

        if let Some(record) = self.waiting.pop_front() {
            debug!(
                run = %self.engine.run_id(),
                configuration = %record.configuration(),
                runs = record.run_count(),
                "replicating"
            );
            return Ok(self.dispatch(record));
        }

        loop {
            let Some(candidate) = self.algorithm.next_configuration()? else {
                debug!(run = %self.engine.run_id(), "algorithm exhausted");
                return Ok(Dispatch::Terminate(StopReason::AlgorithmExhausted));
            };

            if !self.engine.is_feasible(&candidate) {
                self.engine
                    .reject_infeasible(candidate, &mut self.algorithm)?;
                self.engine.note_rejection()?;
                if let Some(reason) = self.engine.stop_reason() {
                    return Ok(self.terminate(reason));
                }
                continue;
            }

            if self.is_running(&candidate) {
                debug!(
                    run = %self.engine.run_id(),
                    configuration = %candidate,
                    "already running, drawing another candidate"
                );
                self.engine.note_rejection()?;
                continue;
            }

            let record = match self.engine.cached(&candidate) {
                Some(cached) if self.engine.is_sufficient(&cached) => {
                    self.engine.finalize(cached, &mut self.algorithm)?;
                    self.engine.note_rejection()?;
                    if let Some(reason) = self.engine.stop_reason() {
                        return Ok(self.terminate(reason));
                    }
                    continue;
                }
                Some(cached) => cached,
                None => self.engine.new_record(candidate),
            };
            return Ok(self.dispatch(record));
        }
    }

    fn execution_finished(
        &mut self,
        configuration: &Configuration,
        responses: Option<Responses>,
        runtime: Duration,
    ) -> OptResult<ResultDisposition> {
        let Some(position) = self
            .running
            .iter()
            .position(|f| f.record.configuration() == configuration)
        else {
            warn!(
                run = %self.engine.run_id(),
                configuration = %configuration,
                "result for a configuration that is not running, dropping it"
            );
            return Ok(ResultDisposition::Dropped);
        };

        let InFlight { mut record, .. } = self.running.remove(position);
        // the run is appended even on error; finish the bookkeeping first
        let recorded = self.engine.record_run(&mut record, responses, runtime);

        if !self.engine.is_sufficient(&record) {
            self.waiting.push_back(record);
            return recorded.map(|()| ResultDisposition::Replicating);
        }

        self.engine.finalize(record, &mut self.algorithm)?;
        if self.terminated.is_none() {
            if let Some(reason) = self.engine.stop_reason() {
                self.terminated = Some(reason);
            }
        }
        recorded.map(|()| ResultDisposition::Finalized)
    }

    fn is_running(&self, configuration: &Configuration) -> bool {
        self.running
            .iter()
            .any(|f| f.record.configuration() == configuration)
    }

    fn dispatch(&mut self, record: ReplicationRecord) -> Dispatch {
        let configuration = record.configuration().clone();
        self.running.push(InFlight {
            record,
            dispatched_at: Instant::now(),
        });
        self.engine.note_dispatch();
        Dispatch::Continue(configuration)
    }

    fn terminate(&mut self, reason: StopReason) -> Dispatch {
        self.terminated = Some(reason.clone());
        Dispatch::Terminate(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{MaxSimulationRuns, MinRuns, ResponseRange};
    use crate::problem::SimpleProblem;
    use crate::search::GridSearch;
    use crate::search::SearchSpace;
    use crate::testing::{f_of, responses, x, xs, AlgorithmLog, ScriptedAlgorithm};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const RUNTIME: Duration = Duration::from_millis(10);

    fn optimizer(
        script: &[i64],
        problem: SimpleProblem,
    ) -> (ParallelOptimizer<ScriptedAlgorithm, SimpleProblem>, AlgorithmLog) {
        let (algorithm, log) = ScriptedAlgorithm::new(xs(script));
        let opt = ParallelOptimizer::new(OptimizerConfig::new("test"), algorithm, problem).unwrap();
        (opt, log)
    }

    fn minimize_f() -> SimpleProblem {
        SimpleProblem::minimize_responses(["f"])
    }

    fn dispatched(opt: &ParallelOptimizer<ScriptedAlgorithm, SimpleProblem>) -> Configuration {
        match opt.next().unwrap() {
            Dispatch::Continue(cfg) => cfg,
            Dispatch::Terminate(reason) => panic!("unexpected termination: {reason}"),
        }
    }

    #[test]
    fn fills_the_pool_and_accepts_results_out_of_order() {
        let (opt, log) = optimizer(&[1, 2, 3], minimize_f());

        let batch: Vec<_> = (0..3).map(|_| dispatched(&opt)).collect();
        assert_eq!(batch, xs(&[1, 2, 3]));
        assert_eq!(opt.running_count(), 3);

        for cfg in [x(3), x(1), x(2)] {
            let disposition = opt.execution_finished(&cfg, f_of(&cfg), RUNTIME).unwrap();
            assert_eq!(disposition, ResultDisposition::Finalized);
        }
        assert_eq!(opt.running_count(), 0);
        assert_eq!(log.reported_f(), vec![3.0, 1.0, 2.0]);

        assert_eq!(
            opt.next().unwrap(),
            Dispatch::Terminate(StopReason::AlgorithmExhausted)
        );
        opt.with_statistics(|stats| {
            assert_eq!(stats.total_configuration_runs(), 3);
            assert_eq!(stats.total_simulation_runs(), 3);
            assert_eq!(stats.best_record().unwrap().configuration(), &x(1));
        });
    }

    #[test]
    fn duplicate_of_running_configuration_is_skipped() {
        let (opt, log) = optimizer(&[1, 1, 2], minimize_f());

        assert_eq!(dispatched(&opt), x(1));
        assert_eq!(dispatched(&opt), x(2));
        assert_eq!(opt.running_configurations(), xs(&[1, 2]));
        assert_eq!(log.requests(), 3);

        let snapshot = opt.statistics_snapshot();
        assert_eq!(snapshot.violated_pre_constraints, 0);
        assert_eq!(snapshot.evaluated, 0);
    }

    #[test]
    fn unmatched_result_is_dropped() {
        let (opt, log) = optimizer(&[1], minimize_f());
        dispatched(&opt);

        let disposition = opt.execution_finished(&x(9), f_of(&x(9)), RUNTIME).unwrap();
        assert_eq!(disposition, ResultDisposition::Dropped);
        assert_eq!(opt.running_configurations(), vec![x(1)]);
        assert!(log.results().is_empty());
    }

    #[test]
    fn replication_queues_until_sufficient() {
        let problem = minimize_f().with_replication_criterion(MinRuns(2));
        let (opt, log) = optimizer(&[7], problem);

        let c = dispatched(&opt);
        let disposition = opt.execution_finished(&c, responses(&[("f", 1.0)]), RUNTIME).unwrap();
        assert_eq!(disposition, ResultDisposition::Replicating);
        assert_eq!(opt.waiting_configurations(), vec![c.clone()]);
        assert_eq!(opt.running_count(), 0);
        assert_eq!(opt.statistics_snapshot().evaluated, 0);

        // served from the queue, the algorithm is not consulted
        assert_eq!(dispatched(&opt), c);
        assert_eq!(log.requests(), 1);
        assert!(opt.waiting_configurations().is_empty());

        let disposition = opt.execution_finished(&c, responses(&[("f", 3.0)]), RUNTIME).unwrap();
        assert_eq!(disposition, ResultDisposition::Finalized);

        opt.with_statistics(|stats| {
            assert_eq!(stats.history().len(), 1);
            assert_eq!(stats.total_configuration_runs(), 1);
            assert_eq!(stats.total_simulation_runs(), 2);
        });
        assert_eq!(log.reported_f(), vec![2.0]);

        // a late duplicate result no longer matches anything
        let disposition = opt.execution_finished(&c, responses(&[("f", 3.0)]), RUNTIME).unwrap();
        assert_eq!(disposition, ResultDisposition::Dropped);
        assert_eq!(opt.statistics_snapshot().evaluated, 1);
    }

    #[test]
    fn cache_hit_short_circuits_execution() {
        let (opt, log) = optimizer(&[4, 4, 8], minimize_f());

        let c = dispatched(&opt);
        opt.execution_finished(&c, responses(&[("f", 5.0)]), RUNTIME).unwrap();
        assert!(opt.is_cached(&c));

        // the second x=4 never reaches the executor
        assert_eq!(dispatched(&opt), x(8));
        assert_eq!(log.reported_f(), vec![5.0, 5.0]);
        assert_eq!(log.results()[1].0, c);

        opt.with_statistics(|stats| {
            assert_eq!(stats.total_simulation_runs(), 1);
            assert_eq!(stats.found_in_storage(), 1);
        });
    }

    #[test]
    fn cached_record_needing_more_runs_resumes_and_counts_post_violations() {
        let required = Arc::new(AtomicUsize::new(1));
        let threshold = Arc::clone(&required);
        let problem = minimize_f()
            .with_post_constraint(ResponseRange::new("f", 0.0, 10.0))
            .with_replication_criterion(move |r: &ReplicationRecord| {
                r.run_count() >= threshold.load(Ordering::SeqCst)
            });
        let (opt, log) = optimizer(&[4, 4], problem);

        // fresh record: a violation here is not counted by default
        let c = dispatched(&opt);
        opt.execution_finished(&c, responses(&[("f", 50.0)]), RUNTIME).unwrap();
        assert_eq!(opt.statistics_snapshot().violated_post_constraints, 0);

        // raise the bar, so the cached record needs one more run
        required.store(2, Ordering::SeqCst);
        assert_eq!(dispatched(&opt), c);
        opt.execution_finished(&c, responses(&[("f", 60.0)]), RUNTIME).unwrap();

        let snapshot = opt.statistics_snapshot();
        assert_eq!(snapshot.violated_post_constraints, 1);
        assert_eq!(snapshot.found_in_storage, 1);
        assert_eq!(snapshot.total_simulation_runs, 2);
        assert_eq!(log.reported_f(), vec![f64::INFINITY, f64::INFINITY]);
    }

    #[test]
    fn objective_error_still_finalizes_the_replicated_record() {
        let problem = minimize_f().with_replication_criterion(MinRuns(2));
        let (opt, log) = optimizer(&[3], problem);

        let c = dispatched(&opt);
        opt.execution_finished(&c, responses(&[("f", 1.0)]), RUNTIME).unwrap();
        assert_eq!(dispatched(&opt), c);

        let err = opt
            .execution_finished(&c, responses(&[("g", 1.0)]), RUNTIME)
            .unwrap_err();
        assert!(matches!(err, so_types::OptError::Problem { .. }));

        assert_eq!(opt.running_count(), 0);
        assert!(opt.waiting_configurations().is_empty());
        assert!(opt.is_cached(&c));
        opt.with_statistics(|stats| {
            assert_eq!(stats.history().len(), 1);
            assert_eq!(stats.history()[0].run_count(), 2);
            assert_eq!(stats.total_simulation_runs(), 2);
        });
        assert_eq!(log.reported_f(), vec![f64::INFINITY]);
    }

    #[test]
    fn objective_error_on_a_single_run_is_not_dropped() {
        let (opt, log) = optimizer(&[3, 5], minimize_f());

        let batch: Vec<_> = (0..2).map(|_| dispatched(&opt)).collect();
        assert!(opt
            .execution_finished(&batch[0], responses(&[("g", 1.0)]), RUNTIME)
            .is_err());
        assert_eq!(opt.running_configurations(), vec![batch[1].clone()]);

        opt.execution_finished(&batch[1], f_of(&batch[1]), RUNTIME).unwrap();
        opt.with_statistics(|stats| {
            assert_eq!(stats.history().len(), 2);
            assert_eq!(stats.best_record().unwrap().configuration(), &x(5));
        });
        assert_eq!(log.reported_f(), vec![f64::INFINITY, 5.0]);
    }

    #[test]
    fn resumed_record_replaces_its_stale_front_entry() {
        let required = Arc::new(AtomicUsize::new(1));
        let threshold = Arc::clone(&required);
        let problem = minimize_f().with_replication_criterion(move |r: &ReplicationRecord| {
            r.run_count() >= threshold.load(Ordering::SeqCst)
        });
        let (opt, log) = optimizer(&[4, 4], problem);

        let c = dispatched(&opt);
        opt.execution_finished(&c, responses(&[("f", 1.0)]), RUNTIME).unwrap();
        assert_eq!(opt.pareto_front().get(&c).unwrap()["f"], 1.0);

        required.store(2, Ordering::SeqCst);
        assert_eq!(dispatched(&opt), c);
        opt.execution_finished(&c, responses(&[("f", 9.0)]), RUNTIME).unwrap();

        let front = opt.pareto_front();
        assert_eq!(front.len(), 1);
        assert_eq!(front.get(&c).unwrap()["f"], 5.0);
        assert_eq!(log.reported_f(), vec![1.0, 5.0]);
    }

    #[test]
    fn cancel_criterion_reached_during_finalization_is_permanent() {
        let problem = minimize_f().with_cancel_criterion(MaxSimulationRuns(2));
        let (opt, _) = optimizer(&[1, 2, 3, 4], problem);

        let batch: Vec<_> = (0..3).map(|_| dispatched(&opt)).collect();
        opt.execution_finished(&batch[0], f_of(&batch[0]), RUNTIME).unwrap();
        assert!(!opt.is_terminated());
        opt.execution_finished(&batch[1], f_of(&batch[1]), RUNTIME).unwrap();
        assert!(opt.is_terminated());

        let expected = Dispatch::Terminate(StopReason::CancelCriterion {
            name: "max-simulation-runs".into(),
        });
        assert_eq!(opt.next().unwrap(), expected);
        assert_eq!(opt.next().unwrap(), expected);

        // in-flight work is still accounted for
        let disposition = opt
            .execution_finished(&batch[2], f_of(&batch[2]), RUNTIME)
            .unwrap();
        assert_eq!(disposition, ResultDisposition::Finalized);
        assert_eq!(opt.statistics_snapshot().total_simulation_runs, 3);
    }

    #[test]
    fn infeasible_candidates_are_finalized_without_dispatch() {
        let problem = minimize_f()
            .with_pre_constraint(|c: &Configuration| c.get_f64("x").is_some_and(|x| x > 0.0));
        let (opt, log) = optimizer(&[-1, -2, 3], problem);

        assert_eq!(dispatched(&opt), x(3));
        assert_eq!(opt.statistics_snapshot().violated_pre_constraints, 2);
        assert_eq!(log.reported_f(), vec![f64::INFINITY, f64::INFINITY]);
    }

    #[test]
    fn stale_executions_can_be_reaped() {
        let (opt, _) = optimizer(&[1, 2], minimize_f());
        dispatched(&opt);
        dispatched(&opt);

        assert!(opt.reap_stale(Duration::from_secs(3600)).is_empty());
        let reaped = opt.reap_stale(Duration::ZERO);
        assert_eq!(reaped, xs(&[1, 2]));
        assert_eq!(opt.running_count(), 0);

        let disposition = opt.execution_finished(&x(1), f_of(&x(1)), RUNTIME).unwrap();
        assert_eq!(disposition, ResultDisposition::Dropped);
    }

    #[test]
    fn concurrent_workers_finalize_every_configuration_once() {
        let space = SearchSpace::new().add_int("x", 0, 199);
        let algorithm = GridSearch::new(&space, 2).unwrap();
        let opt = Arc::new(
            ParallelOptimizer::new(OptimizerConfig::new("threads"), algorithm, minimize_f())
                .unwrap(),
        );

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let opt = Arc::clone(&opt);
                std::thread::spawn(move || loop {
                    let running = opt.running_configurations();
                    let unique: HashSet<_> = running.iter().collect();
                    assert_eq!(unique.len(), running.len(), "duplicate dispatch");

                    match opt.next().unwrap() {
                        Dispatch::Continue(cfg) => {
                            let disposition = opt
                                .execution_finished(&cfg, f_of(&cfg), RUNTIME)
                                .unwrap();
                            assert_eq!(disposition, ResultDisposition::Finalized);
                        }
                        Dispatch::Terminate(_) => break,
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        opt.with_statistics(|stats| {
            assert_eq!(stats.history().len(), 200);
            assert_eq!(stats.total_simulation_runs(), 200);
            let distinct: HashSet<_> = stats.history().iter().map(|r| r.configuration()).collect();
            assert_eq!(distinct.len(), 200);
            assert_eq!(stats.best_record().unwrap().configuration(), &x(0));
        });
        assert_eq!(opt.running_count(), 0);
    }
}
