//! Optimizer configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use so_types::{config_error, OptResult};
use uuid::Uuid;

use crate::cache::KeyScheme;
use crate::statistics::DEFAULT_BEST_CAPACITY;

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Which post-constraint violations bump `violated_post_constraints`.
///
/// The sequential and parallel drivers historically count opposite halves:
/// the sequential one only counts violations on freshly created records, the
/// parallel one only on records resumed from the cache. Each driver keeps its
/// historical default unless a policy is set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostViolationCounting {
    FreshOnly,
    CachedOnly,
    Always,
}

impl PostViolationCounting {
    pub fn counts(self, from_cache: bool) -> bool {
        match self {
            Self::FreshOnly => !from_cache,
            Self::CachedOnly => from_cache,
            Self::Always => true,
        }
    }
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub id: OptimizationId,
    pub name: String,
    pub description: String,

    /// Reuse finalized results for configurations seen before.
    pub use_cache: bool,

    /// How cache identifiers are derived.
    pub cache_keys: KeyScheme,

    /// Size of the bounded best-records list.
    pub best_capacity: usize,

    /// `None` keeps the driver's historical default.
    pub post_violation_counting: Option<PostViolationCounting>,

    /// Fail `next()` after this many consecutive rejected candidates.
    /// `None` never gives up.
    pub max_consecutive_rejections: Option<usize>,

    /// How many configurations the parallel driver keeps in flight.
    pub concurrency: usize,

    pub created_at: DateTime<Utc>,
}

impl OptimizerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            use_cache: true,
            cache_keys: KeyScheme::Structural,
            best_capacity: DEFAULT_BEST_CAPACITY,
            post_violation_counting: None,
            max_consecutive_rejections: None,
            concurrency: 4,
            created_at: Utc::now(),
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn with_cache_keys(mut self, scheme: KeyScheme) -> Self {
        self.cache_keys = scheme;
        self
    }

    pub fn with_best_capacity(mut self, n: usize) -> Self {
        self.best_capacity = n;
        self
    }

    pub fn with_post_violation_counting(mut self, policy: PostViolationCounting) -> Self {
        self.post_violation_counting = Some(policy);
        self
    }

    pub fn with_max_consecutive_rejections(mut self, n: usize) -> Self {
        self.max_consecutive_rejections = Some(n);
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn validate(&self) -> OptResult<()> {
        if self.concurrency == 0 {
            return Err(config_error!("concurrency must be at least 1"));
        }
        if self.max_consecutive_rejections == Some(0) {
            return Err(config_error!(
                "max_consecutive_rejections must be at least 1 when set"
            ));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::new("optimization")
    }
}
