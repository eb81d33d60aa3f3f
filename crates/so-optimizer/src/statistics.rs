//! Running counters, the bounded best list and the full evaluation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use so_types::{Configuration, ObjectiveMap};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::record::ReplicationRecord;

/// Default size of the best-records list.
pub const DEFAULT_BEST_CAPACITY: usize = 30;

#[derive(Debug, Clone)]
pub struct OptimizationStatistics {
    total_configuration_runs: u64,
    total_simulation_runs: u64,
    total_optimization_time: Duration,
    found_in_storage: u64,
    violated_pre_constraints: u64,
    violated_post_constraints: u64,
    best_capacity: usize,
    /// Best first.
    best: Vec<Arc<ReplicationRecord>>,
    history: Vec<Arc<ReplicationRecord>>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl OptimizationStatistics {
    pub fn new(best_capacity: usize) -> Self {
        Self {
            total_configuration_runs: 0,
            total_simulation_runs: 0,
            total_optimization_time: Duration::ZERO,
            found_in_storage: 0,
            violated_pre_constraints: 0,
            violated_post_constraints: 0,
            best_capacity,
            best: Vec::new(),
            history: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Account for a finalized record.
    ///
    /// Cache hits bump `found_in_storage`; records with freshly executed runs
    /// bump `total_configuration_runs`. Only fresh runs count towards
    /// `total_simulation_runs` and `total_optimization_time`. `rank(a, b)`
    /// returns `Less` when `a` is the better representative.
    pub fn record<F>(&mut self, record: Arc<ReplicationRecord>, rank: F)
    where
        F: Fn(&ObjectiveMap, &ObjectiveMap) -> Ordering,
    {
        if record.is_from_cache() {
            self.found_in_storage += 1;
        } else if record.fresh_runs() > 0 {
            self.total_configuration_runs += 1;
        }

        let fresh = record.fresh_runs();
        self.total_simulation_runs += fresh as u64;
        self.total_optimization_time += record
            .runs()
            .iter()
            .rev()
            .filter(|r| r.is_executed())
            .take(fresh)
            .map(|r| r.runtime)
            .sum::<Duration>();

        self.insert_best(record.clone(), rank);
        self.history.push(record);
    }

    fn insert_best<F>(&mut self, record: Arc<ReplicationRecord>, rank: F)
    where
        F: Fn(&ObjectiveMap, &ObjectiveMap) -> Ordering,
    {
        if self.best_capacity == 0 {
            return;
        }
        let empty = ObjectiveMap::new();
        let candidate = record.representative().unwrap_or(&empty);
        let position = self
            .best
            .iter()
            .position(|existing| {
                rank(candidate, existing.representative().unwrap_or(&empty)) == Ordering::Less
            })
            .unwrap_or(self.best.len());

        if position >= self.best_capacity {
            return;
        }
        self.best.insert(position, record);
        self.best.truncate(self.best_capacity);
    }

    pub(crate) fn record_pre_constraint_violation(&mut self) {
        self.violated_pre_constraints += 1;
    }

    pub(crate) fn record_post_constraint_violation(&mut self) {
        self.violated_post_constraints += 1;
    }

    pub fn total_configuration_runs(&self) -> u64 {
        self.total_configuration_runs
    }

    pub fn total_simulation_runs(&self) -> u64 {
        self.total_simulation_runs
    }

    /// Sum of the runtimes reported for freshly executed runs.
    pub fn total_optimization_time(&self) -> Duration {
        self.total_optimization_time
    }

    pub fn found_in_storage(&self) -> u64 {
        self.found_in_storage
    }

    pub fn violated_pre_constraints(&self) -> u64 {
        self.violated_pre_constraints
    }

    pub fn violated_post_constraints(&self) -> u64 {
        self.violated_post_constraints
    }

    /// Best records seen so far, best first.
    pub fn best(&self) -> &[Arc<ReplicationRecord>] {
        &self.best
    }

    pub fn best_record(&self) -> Option<&Arc<ReplicationRecord>> {
        self.best.first()
    }

    pub fn best_capacity(&self) -> usize {
        self.best_capacity
    }

    /// Every finalized record, in finalization order.
    pub fn history(&self) -> &[Arc<ReplicationRecord>] {
        &self.history
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time since the statistics were created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_configuration_runs: self.total_configuration_runs,
            total_simulation_runs: self.total_simulation_runs,
            total_optimization_time: self.total_optimization_time,
            found_in_storage: self.found_in_storage,
            violated_pre_constraints: self.violated_pre_constraints,
            violated_post_constraints: self.violated_post_constraints,
            evaluated: self.history.len(),
            best: self
                .best
                .iter()
                .map(|r| BestEntry {
                    configuration: r.configuration().clone(),
                    objectives: r.representative().cloned().unwrap_or_default(),
                    runs: r.run_count(),
                })
                .collect(),
            started_at: self.started_at,
        }
    }
}

impl Default for OptimizationStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_BEST_CAPACITY)
    }
}

/// Serializable view of the statistics at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_configuration_runs: u64,
    pub total_simulation_runs: u64,
    pub total_optimization_time: Duration,
    pub found_in_storage: u64,
    pub violated_pre_constraints: u64,
    pub violated_post_constraints: u64,
    pub evaluated: usize,
    pub best: Vec<BestEntry>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEntry {
    pub configuration: Configuration,
    pub objectives: ObjectiveMap,
    pub runs: usize,
}

/// Rank objective vectors by the sum of their values, smaller first.
pub fn rank_by_sum(a: &ObjectiveMap, b: &ObjectiveMap) -> Ordering {
    let sa: f64 = a.values().sum();
    let sb: f64 = b.values().sum();
    sa.total_cmp(&sb)
}
