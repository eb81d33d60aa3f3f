//! Fixtures shared by the optimizer tests.

use parking_lot::Mutex;
use so_types::{Configuration, ObjectiveMap, OptResult, Responses};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::pareto::ParetoFront;
use crate::search::Algorithm;

/// What a scripted algorithm was asked and told.
#[derive(Debug, Clone, Default)]
pub(crate) struct AlgorithmLog(Arc<Mutex<LogInner>>);

#[derive(Debug, Default)]
struct LogInner {
    requests: usize,
    results: Vec<(Configuration, ObjectiveMap)>,
}

impl AlgorithmLog {
    pub(crate) fn requests(&self) -> usize {
        self.0.lock().requests
    }

    pub(crate) fn results(&self) -> Vec<(Configuration, ObjectiveMap)> {
        self.0.lock().results.clone()
    }

    /// Objective `f` of every reported result, in report order.
    pub(crate) fn reported_f(&self) -> Vec<f64> {
        self.0
            .lock()
            .results
            .iter()
            .map(|(_, o)| o.get("f").copied().unwrap_or(f64::NAN))
            .collect()
    }
}

/// Replays a fixed list of configurations, then reports exhaustion.
#[derive(Debug)]
pub(crate) struct ScriptedAlgorithm {
    script: VecDeque<Configuration>,
    repeat_last: bool,
    log: AlgorithmLog,
}

impl ScriptedAlgorithm {
    pub(crate) fn new(script: Vec<Configuration>) -> (Self, AlgorithmLog) {
        let log = AlgorithmLog::default();
        let algorithm = Self {
            script: script.into(),
            repeat_last: false,
            log: log.clone(),
        };
        (algorithm, log)
    }

    /// Keeps proposing the last configuration forever.
    pub(crate) fn repeating(configuration: Configuration) -> (Self, AlgorithmLog) {
        let (mut algorithm, log) = Self::new(vec![configuration]);
        algorithm.repeat_last = true;
        (algorithm, log)
    }
}

impl Algorithm for ScriptedAlgorithm {
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>> {
        self.log.0.lock().requests += 1;
        if self.repeat_last && self.script.len() == 1 {
            return Ok(self.script.front().cloned());
        }
        Ok(self.script.pop_front())
    }

    fn add_results(
        &mut self,
        configuration: &Configuration,
        objectives: &ObjectiveMap,
        _front: &ParetoFront,
    ) {
        self.log
            .0
            .lock()
            .results
            .push((configuration.clone(), objectives.clone()));
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub(crate) fn x(value: i64) -> Configuration {
    Configuration::new().with("x", value)
}

pub(crate) fn xs(values: &[i64]) -> Vec<Configuration> {
    values.iter().map(|v| x(*v)).collect()
}

pub(crate) fn responses(pairs: &[(&str, f64)]) -> Option<Responses> {
    Some(
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
    )
}

/// Responses where `f` equals the configuration's `x`.
pub(crate) fn f_of(configuration: &Configuration) -> Option<Responses> {
    responses(&[("f", configuration.get_f64("x").unwrap_or(f64::NAN))])
}
