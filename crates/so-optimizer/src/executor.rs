//! In-process execution of simulation models and the driver loops that pair
//! an optimizer with them.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use so_types::{Configuration, ObjectiveMap, OptError, OptResult, Responses};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::OptimizationId;
use crate::engine::{Dispatch, StopReason};
use crate::pareto::ParetoFront;
use crate::parallel::ParallelOptimizer;
use crate::problem::ProblemDefinition;
use crate::search::Algorithm;
use crate::sequential::SequentialOptimizer;
use crate::statistics::StatisticsSnapshot;

/// A simulation model: configuration in, responses out. `None` marks a
/// failed execution.
pub trait Model: Send + Sync {
    fn evaluate(&self, configuration: &Configuration) -> Option<Responses>;
}

impl<F> Model for F
where
    F: Fn(&Configuration) -> Option<Responses> + Send + Sync,
{
    fn evaluate(&self, configuration: &Configuration) -> Option<Responses> {
        self(configuration)
    }
}

/// One finished execution.
#[derive(Debug, Clone)]
pub struct Completion {
    pub configuration: Configuration,
    pub responses: Option<Responses>,
    pub runtime: Duration,
}

/// Runs a model on a dedicated rayon pool and delivers completions over a
/// channel, in completion order.
pub struct LocalExecutor<M> {
    model: Arc<M>,
    pool: ThreadPool,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl<M: Model + 'static> LocalExecutor<M> {
    pub fn new(model: M, threads: usize) -> OptResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("so-worker-{i}"))
            .build()
            .map_err(|e| OptError::Executor {
                message: e.to_string(),
            })?;
        let (completion_tx, completion_rx) = unbounded();
        Ok(Self {
            model: Arc::new(model),
            pool,
            completion_tx,
            completion_rx,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `configuration` for execution. A panicking model is reported as
    /// a failed execution.
    pub fn submit(&self, configuration: Configuration) {
        let model = Arc::clone(&self.model);
        let tx = self.completion_tx.clone();
        self.pool.spawn(move || {
            let started = Instant::now();
            let responses = catch_unwind(AssertUnwindSafe(|| model.evaluate(&configuration)))
                .unwrap_or_else(|_| {
                    warn!(configuration = %configuration, "model panicked");
                    None
                });
            let completion = Completion {
                configuration,
                responses,
                runtime: started.elapsed(),
            };
            let _ = tx.send(completion);
        });
    }

    /// Block until the next execution completes.
    pub fn recv(&self) -> OptResult<Completion> {
        self.completion_rx.recv().map_err(|e| OptError::Executor {
            message: e.to_string(),
        })
    }

    /// Like [`recv`](Self::recv), giving up after `timeout` with `Ok(None)`.
    pub fn recv_timeout(&self, timeout: Duration) -> OptResult<Option<Completion>> {
        match self.completion_rx.recv_timeout(timeout) {
            Ok(completion) => Ok(Some(completion)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(OptError::Executor {
                message: e.to_string(),
            }),
        }
    }
}

/// Outcome of a complete optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: OptimizationId,
    pub name: String,
    pub stop_reason: StopReason,
    pub statistics: StatisticsSnapshot,
    pub pareto_front: Vec<FrontEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontEntry {
    pub configuration: Configuration,
    pub objectives: ObjectiveMap,
}

fn front_entries(front: &ParetoFront) -> Vec<FrontEntry> {
    let mut entries: Vec<_> = front
        .iter()
        .map(|(configuration, objectives)| FrontEntry {
            configuration: configuration.clone(),
            objectives: objectives.clone(),
        })
        .collect();
    entries.sort_by_key(|e| e.configuration.to_string());
    entries
}

/// Drive a sequential optimizer to termination, evaluating `model` on the
/// calling thread.
pub fn run_sequential<A, P, M>(
    optimizer: &mut SequentialOptimizer<A, P>,
    model: &M,
) -> OptResult<RunSummary>
where
    A: Algorithm,
    P: ProblemDefinition,
    M: Model + ?Sized,
{
    let stop_reason = loop {
        match optimizer.next()? {
            Dispatch::Continue(configuration) => {
                let started = Instant::now();
                let responses = model.evaluate(&configuration);
                optimizer.execution_finished(responses, started.elapsed())?;
            }
            Dispatch::Terminate(reason) => break reason,
        }
    };

    let summary = RunSummary {
        run_id: optimizer.config().id,
        name: optimizer.config().name.clone(),
        stop_reason,
        statistics: optimizer.statistics().snapshot(),
        pareto_front: front_entries(optimizer.pareto_front()),
    };
    info!(
        run = %summary.run_id,
        reason = %summary.stop_reason,
        evaluated = summary.statistics.evaluated,
        "sequential run finished"
    );
    Ok(summary)
}

/// Drive a parallel optimizer to termination, keeping up to
/// `config().concurrency` executions in flight on `executor`.
///
/// Executions still in flight when the optimizer signals termination are
/// collected and reported before returning.
pub fn run_parallel<A, P, M>(
    optimizer: &ParallelOptimizer<A, P>,
    executor: &LocalExecutor<M>,
) -> OptResult<RunSummary>
where
    A: Algorithm,
    P: ProblemDefinition,
    M: Model + 'static,
{
    let capacity = optimizer.config().concurrency;
    let mut in_flight = 0usize;

    let stop_reason = loop {
        let mut terminated = None;
        while in_flight < capacity {
            match optimizer.next()? {
                Dispatch::Continue(configuration) => {
                    executor.submit(configuration);
                    in_flight += 1;
                }
                Dispatch::Terminate(reason) => {
                    terminated = Some(reason);
                    break;
                }
            }
        }

        if in_flight == 0 {
            match terminated {
                Some(reason) => break reason,
                None => {
                    return Err(OptError::Executor {
                        message: "nothing in flight and nothing to dispatch".into(),
                    })
                }
            }
        }

        let completion = executor.recv()?;
        in_flight -= 1;
        let disposition = optimizer.execution_finished(
            &completion.configuration,
            completion.responses,
            completion.runtime,
        )?;
        debug!(
            configuration = %completion.configuration,
            ?disposition,
            in_flight,
            "execution completed"
        );
    };

    let summary = RunSummary {
        run_id: optimizer.config().id,
        name: optimizer.config().name.clone(),
        stop_reason,
        statistics: optimizer.statistics_snapshot(),
        pareto_front: front_entries(&optimizer.pareto_front()),
    };
    info!(
        run = %summary.run_id,
        reason = %summary.stop_reason,
        evaluated = summary.statistics.evaluated,
        simulation_runs = summary.statistics.total_simulation_runs,
        "parallel run finished"
    );
    Ok(summary)
}
