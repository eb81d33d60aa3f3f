//! Non-dominated set of evaluated configurations.

use so_types::{Configuration, ObjectiveMap};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Pareto comparison of two objective vectors, smaller is better.
///
/// Returns `Less` when `a` dominates `b`, `Greater` when `b` dominates `a`,
/// and `Equal` when they are equal or incomparable. Objectives missing from
/// one side count as +infinity; a NaN anywhere makes the pair incomparable.
pub fn pareto_dominance(a: &ObjectiveMap, b: &ObjectiveMap) -> Ordering {
    let mut a_better = false;
    let mut b_better = false;

    for name in a.keys().chain(b.keys()) {
        let x = a.get(name).copied().unwrap_or(f64::INFINITY);
        let y = b.get(name).copied().unwrap_or(f64::INFINITY);
        match x.partial_cmp(&y) {
            Some(Ordering::Less) => a_better = true,
            Some(Ordering::Greater) => b_better = true,
            Some(Ordering::Equal) => {}
            None => return Ordering::Equal,
        }
    }

    match (a_better, b_better) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Configurations whose representative objectives no other entry dominates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParetoFront {
    entries: HashMap<Configuration, ObjectiveMap>,
}

impl ParetoFront {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a configuration to the front.
    ///
    /// `compare(new, existing)` must return `Less` if `new` dominates
    /// `existing`, `Greater` if it is dominated, `Equal` otherwise. Entries the
    /// new vector dominates are dropped; the new vector is inserted unless some
    /// entry dominates it. Returns whether it was inserted.
    ///
    /// An existing entry for the same configuration is replaced, never
    /// compared against: a re-finalized record's latest vector always wins
    /// over its own stale one.
    pub fn consider_for_front<F>(
        &mut self,
        configuration: &Configuration,
        objectives: &ObjectiveMap,
        compare: F,
    ) -> bool
    where
        F: Fn(&ObjectiveMap, &ObjectiveMap) -> Ordering,
    {
        self.entries.remove(configuration);
        if self.entries.is_empty() {
            self.entries
                .insert(configuration.clone(), objectives.clone());
            return true;
        }

        let mut rejected = false;
        let mut dominated = Vec::new();
        for (existing_cfg, existing) in &self.entries {
            match compare(objectives, existing) {
                Ordering::Greater => rejected = true,
                Ordering::Less => dominated.push(existing_cfg.clone()),
                Ordering::Equal => {}
            }
        }

        for cfg in dominated {
            self.entries.remove(&cfg);
        }

        if !rejected {
            self.entries
                .insert(configuration.clone(), objectives.clone());
        }
        !rejected
    }

    pub fn get(&self, configuration: &Configuration) -> Option<&ObjectiveMap> {
        self.entries.get(configuration)
    }

    pub fn contains(&self, configuration: &Configuration) -> bool {
        self.entries.contains_key(configuration)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Configuration, &ObjectiveMap)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
