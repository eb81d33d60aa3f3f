//! Store of finalized replication records, keyed by configuration.

use serde::{Deserialize, Serialize};
use so_types::Configuration;
use std::collections::HashMap;
use std::sync::Arc;

use crate::record::ReplicationRecord;

/// Separator used by [`KeyScheme::Rendered`].
pub const RENDERED_KEY_DELIMITER: &str = ",";

/// How cache keys are derived from a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyScheme {
    /// Structural equality and hash of the factor map.
    #[default]
    Structural,
    /// Factor values rendered as text and joined in factor-name order.
    /// Configurations whose values render identically share one entry.
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Structural(Configuration),
    Rendered(String),
}

/// Unbounded configuration cache. Entries live as long as the optimizer.
#[derive(Debug, Default)]
pub struct ConfigurationCache {
    scheme: KeyScheme,
    entries: HashMap<CacheKey, Arc<ReplicationRecord>>,
}

impl ConfigurationCache {
    pub fn new(scheme: KeyScheme) -> Self {
        Self {
            scheme,
            entries: HashMap::new(),
        }
    }

    fn key(&self, configuration: &Configuration) -> CacheKey {
        match self.scheme {
            KeyScheme::Structural => CacheKey::Structural(configuration.clone()),
            KeyScheme::Rendered => {
                CacheKey::Rendered(configuration.rendered_key(RENDERED_KEY_DELIMITER))
            }
        }
    }

    /// Insert or replace the record for its configuration.
    pub fn put(&mut self, record: Arc<ReplicationRecord>) {
        let key = self.key(record.configuration());
        self.entries.insert(key, record);
    }

    pub fn contains(&self, configuration: &Configuration) -> bool {
        self.entries.contains_key(&self.key(configuration))
    }

    pub fn get(&self, configuration: &Configuration) -> Option<Arc<ReplicationRecord>> {
        self.entries.get(&self.key(configuration)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }
}
