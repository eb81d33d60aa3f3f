//! Factor values and the configurations built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A concrete value assigned to one tunable factor of a model.
///
/// Equality is structural: `Int(1)` and `Float(1.0)` are different values.
/// Floats compare by their canonical bit pattern, so `NaN == NaN` and
/// `0.0 == -0.0`, which keeps `Eq` and `Hash` lawful for use as map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl FactorValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn canonical_bits(v: f64) -> u64 {
        if v.is_nan() {
            f64::NAN.to_bits()
        } else if v == 0.0 {
            0
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for FactorValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                Self::canonical_bits(*a) == Self::canonical_bits(*b)
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FactorValue {}

impl Hash for FactorValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => Self::canonical_bits(*v).hash(state),
            Self::Text(v) => v.hash(state),
            // serde_json::Value has no Hash impl; its compact rendering is stable
            Self::Json(v) => v.to_string().hash(state),
        }
    }
}

impl fmt::Display for FactorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for FactorValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for FactorValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for FactorValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FactorValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FactorValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FactorValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<serde_json::Value> for FactorValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// A named assignment of values to the model's tunable factors.
///
/// Factors are kept sorted by name, so iteration order, equality, hashing and
/// the rendered identifier are all independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    factors: BTreeMap<String, FactorValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FactorValue>) -> Self {
        self.factors.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FactorValue>) {
        self.factors.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FactorValue> {
        self.factors.get(name)
    }

    /// Numeric value of a factor, accepting both ints and floats.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.factors.get(name).and_then(FactorValue::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactorValue)> {
        self.factors.iter()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Legacy identifier: every factor value rendered as text, in factor-name
    /// order, joined by `delimiter`. Distinct configurations can render to the
    /// same identifier (`Int(1)` and `Float(1.0)` both render as `1`).
    pub fn rendered_key(&self, delimiter: &str) -> String {
        self.factors
            .values()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

impl FromIterator<(String, FactorValue)> for Configuration {
    fn from_iter<T: IntoIterator<Item = (String, FactorValue)>>(iter: T) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, FactorValue>> for Configuration {
    fn from(factors: BTreeMap<String, FactorValue>) -> Self {
        Self { factors }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.factors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}
