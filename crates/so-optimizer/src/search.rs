//! The search-algorithm seam and a few reference algorithms over a declared
//! search space.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use so_types::{config_error, Configuration, FactorValue, ObjectiveMap, OptResult};
use std::collections::VecDeque;

use crate::pareto::ParetoFront;

/// Proposes configurations and learns from their results.
pub trait Algorithm: Send {
    /// Next configuration to evaluate, or `None` when the algorithm has
    /// nothing left to propose.
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>>;

    /// Notification of a finalized configuration's representative objectives.
    fn add_results(
        &mut self,
        _configuration: &Configuration,
        _objectives: &ObjectiveMap,
        _front: &ParetoFront,
    ) {
    }

    /// Human-readable algorithm name.
    fn name(&self) -> &str;
}

impl<A: Algorithm + ?Sized> Algorithm for Box<A> {
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>> {
        (**self).next_configuration()
    }

    fn add_results(
        &mut self,
        configuration: &Configuration,
        objectives: &ObjectiveMap,
        front: &ParetoFront,
    ) {
        (**self).add_results(configuration, objectives, front)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A single factor dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorDef {
    pub name: String,
    pub kind: FactorKind,
}

/// Describes how a factor is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactorKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<FactorValue> },
}

impl FactorKind {
    /// Reject bounds that cannot be sampled: inverted or non-finite ranges, a
    /// log-uniform range touching zero, and empty choice lists.
    fn validate(&self, name: &str) -> OptResult<()> {
        let valid = match self {
            Self::FloatRange { low, high } => low.is_finite() && high.is_finite() && low <= high,
            Self::IntRange { low, high } => low <= high,
            Self::LogUniform { low, high } => {
                low.is_finite() && high.is_finite() && *low > 0.0 && low <= high
            }
            Self::Choice { values } => !values.is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(config_error!(
                "factor '{}' has an empty or invalid range: {:?}",
                name,
                self
            ))
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> FactorValue {
        match self {
            Self::FloatRange { low, high } => FactorValue::Float(rng.random_range(*low..=*high)),
            Self::IntRange { low, high } => FactorValue::Int(rng.random_range(*low..=*high)),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                FactorValue::Float(log_val.exp())
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    FactorValue::Json(serde_json::Value::Null)
                } else {
                    values[rng.random_range(0..values.len())].clone()
                }
            }
        }
    }
}

/// The full search space: an ordered list of factor definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub factors: Vec<FactorDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.factors.push(FactorDef {
            name: name.into(),
            kind: FactorKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.factors.push(FactorDef {
            name: name.into(),
            kind: FactorKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.factors.push(FactorDef {
            name: name.into(),
            kind: FactorKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<FactorValue>) -> Self {
        self.factors.push(FactorDef {
            name: name.into(),
            kind: FactorKind::Choice { values },
        });
        self
    }

    /// Check every factor's bounds. Algorithms call this on construction.
    pub fn validate(&self) -> OptResult<()> {
        self.factors
            .iter()
            .try_for_each(|f| f.kind.validate(&f.name))
    }

    /// Total number of grid points (returns `None` if any factor is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for factor in &self.factors {
            let dim_size = match &factor.kind {
                FactorKind::IntRange { low, high } => {
                    let span = i128::from(*high) - i128::from(*low) + 1;
                    usize::try_from(span.max(0)).ok()?
                }
                FactorKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> Configuration {
        self.factors
            .iter()
            .map(|f| (f.name.clone(), f.kind.sample(rng)))
            .collect()
    }
}

// ---- Grid search ----

/// Exhaustive grid search. Continuous dimensions are split into
/// `float_steps` evenly spaced points.
#[derive(Debug, Clone)]
pub struct GridSearch {
    pending: VecDeque<Configuration>,
}

impl GridSearch {
    pub fn new(space: &SearchSpace, float_steps: usize) -> OptResult<Self> {
        space.validate()?;
        Ok(Self {
            pending: Self::build_grid(space, float_steps).into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<Configuration> {
        let steps = float_steps.max(2);
        let spaced = |low: f64, high: f64| -> Vec<f64> {
            (0..steps)
                .map(|i| low + (i as f64 / (steps - 1) as f64) * (high - low))
                .collect()
        };

        let mut result = vec![Configuration::new()];
        for factor in &space.factors {
            let values: Vec<FactorValue> = match &factor.kind {
                FactorKind::FloatRange { low, high } => {
                    spaced(*low, *high).into_iter().map(FactorValue::Float).collect()
                }
                FactorKind::IntRange { low, high } => {
                    (*low..=*high).map(FactorValue::Int).collect()
                }
                FactorKind::LogUniform { low, high } => spaced(low.ln(), high.ln())
                    .into_iter()
                    .map(|v| FactorValue::Float(v.exp()))
                    .collect(),
                FactorKind::Choice { values } => values.clone(),
            };

            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in &values {
                    next.push(existing.clone().with(factor.name.clone(), value.clone()));
                }
            }
            result = next;
        }
        result
    }
}

impl Algorithm for GridSearch {
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>> {
        Ok(self.pending.pop_front())
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
    limit: Option<usize>,
    drawn: usize,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> OptResult<Self> {
        Self::with_rng(space, StdRng::from_os_rng())
    }

    pub fn with_seed(space: SearchSpace, seed: u64) -> OptResult<Self> {
        Self::with_rng(space, StdRng::seed_from_u64(seed))
    }

    fn with_rng(space: SearchSpace, rng: StdRng) -> OptResult<Self> {
        space.validate()?;
        Ok(Self {
            space,
            rng,
            limit: None,
            drawn: 0,
        })
    }

    /// Stop proposing after `limit` samples.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Algorithm for RandomSearch {
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>> {
        if self.limit.is_some_and(|limit| self.drawn >= limit) {
            return Ok(None);
        }
        self.drawn += 1;
        Ok(Some(self.space.sample(&mut self.rng)))
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Perturbation search ----

/// Explore/exploit search around the best configuration reported so far.
///
/// With probability `exploration_weight` (and always before the first
/// report) it samples uniformly; otherwise it perturbs the best-known point.
/// Objective vectors are scalarized by their sum, smaller is better.
#[derive(Debug, Clone)]
pub struct PerturbationSearch {
    space: SearchSpace,
    rng: StdRng,
    exploration_weight: f64,
    best: Option<(Configuration, f64)>,
    observations: usize,
}

impl PerturbationSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64) -> OptResult<Self> {
        Self::with_rng(space, exploration_weight, StdRng::from_os_rng())
    }

    pub fn with_seed(space: SearchSpace, exploration_weight: f64, seed: u64) -> OptResult<Self> {
        Self::with_rng(space, exploration_weight, StdRng::seed_from_u64(seed))
    }

    fn with_rng(space: SearchSpace, exploration_weight: f64, rng: StdRng) -> OptResult<Self> {
        space.validate()?;
        Ok(Self {
            space,
            rng,
            exploration_weight,
            best: None,
            observations: 0,
        })
    }

    pub fn best(&self) -> Option<&(Configuration, f64)> {
        self.best.as_ref()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    fn exploit(&mut self, base: &Configuration) -> Configuration {
        let rng = &mut self.rng;
        self.space
            .factors
            .iter()
            .map(|factor| {
                let value = match (&factor.kind, base.get(&factor.name)) {
                    (FactorKind::FloatRange { low, high }, Some(FactorValue::Float(v))) => {
                        let noise = rng.random_range(-0.1..0.1) * (high - low);
                        FactorValue::Float((v + noise).clamp(*low, *high))
                    }
                    (FactorKind::IntRange { low, high }, Some(FactorValue::Int(v))) => {
                        let delta: i64 = rng.random_range(-2..=2);
                        FactorValue::Int((v + delta).clamp(*low, *high))
                    }
                    (FactorKind::LogUniform { low, high }, Some(FactorValue::Float(v))) => {
                        let noise = rng.random_range(-0.1..0.1) * (high.ln() - low.ln());
                        FactorValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                    }
                    // Choices and missing base values are resampled
                    (kind, _) => kind.sample(rng),
                };
                (factor.name.clone(), value)
            })
            .collect()
    }
}

impl Algorithm for PerturbationSearch {
    fn next_configuration(&mut self) -> OptResult<Option<Configuration>> {
        let explore = self.rng.random::<f64>() < self.exploration_weight;
        let configuration = match self.best.clone() {
            Some((base, _)) if !explore => self.exploit(&base),
            _ => self.space.sample(&mut self.rng),
        };
        Ok(Some(configuration))
    }

    fn add_results(
        &mut self,
        configuration: &Configuration,
        objectives: &ObjectiveMap,
        _front: &ParetoFront,
    ) {
        self.observations += 1;
        let score: f64 = objectives.values().sum();
        if score.is_nan() {
            return;
        }
        let improved = self.best.as_ref().map_or(true, |(_, best)| score < *best);
        if improved {
            self.best = Some((configuration.clone(), score));
        }
    }

    fn name(&self) -> &str {
        "perturbation"
    }
}
