//! Replication records: every run collected for one configuration.

use so_types::{Configuration, ObjectiveMap, RunInfo};
use std::sync::Arc;

/// Accumulates the runs of one configuration until it is finalized.
///
/// A record is mutable only while it is in flight. Finalizing consumes it and
/// returns a shared, frozen `Arc<ReplicationRecord>`, which is what the cache,
/// the statistics and the history hold on to.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationRecord {
    configuration: Configuration,
    runs: Vec<RunInfo>,
    sequence: u64,
    from_cache: bool,
    fresh_runs: usize,
    representative: Option<ObjectiveMap>,
}

impl ReplicationRecord {
    pub fn new(configuration: Configuration, sequence: u64) -> Self {
        Self {
            configuration,
            runs: Vec::new(),
            sequence,
            from_cache: false,
            fresh_runs: 0,
            representative: None,
        }
    }

    /// Working copy of a cached record. Keeps the stored runs so replication
    /// criteria see the full history, but counts no fresh runs.
    pub fn resume(cached: &ReplicationRecord, sequence: u64) -> Self {
        Self {
            configuration: cached.configuration.clone(),
            runs: cached.runs.clone(),
            sequence,
            from_cache: true,
            fresh_runs: 0,
            representative: None,
        }
    }

    pub fn add_run(&mut self, run: RunInfo) {
        debug_assert!(
            self.representative.is_none(),
            "run added to a finalized record"
        );
        if run.is_executed() {
            self.fresh_runs += 1;
        }
        self.runs.push(run);
    }

    pub(crate) fn finalize(mut self, representative: ObjectiveMap) -> Arc<Self> {
        self.representative = Some(representative);
        Arc::new(self)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn runs(&self) -> &[RunInfo] {
        &self.runs
    }

    pub fn last_run(&self) -> Option<&RunInfo> {
        self.runs.last()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Runs actually executed by the backend (excludes synthetic records).
    pub fn executed_runs(&self) -> usize {
        self.runs.iter().filter(|r| r.is_executed()).count()
    }

    /// Runs whose objectives are all +infinity.
    pub fn failed_runs(&self) -> usize {
        self.runs.iter().filter(|r| r.is_failure()).count()
    }

    /// Runs appended since this record was created or resumed from the cache.
    pub fn fresh_runs(&self) -> usize {
        self.fresh_runs
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn is_finalized(&self) -> bool {
        self.representative.is_some()
    }

    /// Representative objective vector, set at finalization.
    pub fn representative(&self) -> Option<&ObjectiveMap> {
        self.representative.as_ref()
    }

    /// Per-objective arithmetic mean over all runs. Any +infinity run makes
    /// that objective +infinity.
    pub fn mean_objectives(&self) -> ObjectiveMap {
        let mut sums = ObjectiveMap::new();
        let mut counts = std::collections::BTreeMap::<&str, usize>::new();
        for run in &self.runs {
            for (name, value) in &run.objectives {
                *sums.entry(name.clone()).or_insert(0.0) += value;
                *counts.entry(name.as_str()).or_insert(0) += 1;
            }
        }
        sums.into_iter()
            .map(|(name, sum)| {
                let n = counts.get(name.as_str()).copied().unwrap_or(1);
                (name, sum / n as f64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use so_types::failure_objectives;
    use std::time::Duration;

    fn objectives(value: f64) -> ObjectiveMap {
        let mut map = ObjectiveMap::new();
        map.insert("f".into(), value);
        map
    }

    fn executed(cfg: &Configuration, value: f64) -> RunInfo {
        RunInfo::executed(cfg.clone(), None, objectives(value), Duration::from_millis(5))
    }

    #[test]
    fn mean_of_replicated_runs() {
        let cfg = Configuration::new().with("x", 1);
        let mut record = ReplicationRecord::new(cfg.clone(), 0);
        record.add_run(executed(&cfg, 2.0));
        record.add_run(executed(&cfg, 4.0));

        assert_eq!(record.run_count(), 2);
        assert_eq!(record.fresh_runs(), 2);
        assert_eq!(record.mean_objectives().get("f"), Some(&3.0));
    }

    #[test]
    fn infinite_run_dominates_mean() {
        let cfg = Configuration::new().with("x", 1);
        let mut record = ReplicationRecord::new(cfg.clone(), 0);
        record.add_run(executed(&cfg, 2.0));
        record.add_run(RunInfo::infeasible(cfg, failure_objectives(["f"])));

        assert_eq!(record.mean_objectives().get("f"), Some(&f64::INFINITY));
        assert_eq!(record.executed_runs(), 1);
        assert_eq!(record.failed_runs(), 1);
        assert_eq!(record.fresh_runs(), 1);
    }

    #[test]
    fn resume_keeps_runs_but_no_fresh_count() {
        let cfg = Configuration::new().with("x", 1);
        let mut record = ReplicationRecord::new(cfg.clone(), 3);
        record.add_run(executed(&cfg, 1.0));
        let frozen = record.finalize(objectives(1.0));
        assert!(frozen.is_finalized());

        let resumed = ReplicationRecord::resume(&frozen, 9);
        assert!(resumed.is_from_cache());
        assert!(!resumed.is_finalized());
        assert_eq!(resumed.run_count(), 1);
        assert_eq!(resumed.fresh_runs(), 0);
        assert_eq!(resumed.sequence(), 9);
    }
}
