use std::collections::btree_map::{Entry, Iter};
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Typed value of a normalized variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Variable {
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Label(String),
}

impl Variable {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Variable::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Variable::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Variable::Label(s) => Some(s),
            _ => None,
        }
    }
}

/// Normalized variables of one cycle, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VariableMap {
    inner: BTreeMap<String, Variable>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `name` is already taken. Returns whether the value was stored.
    pub fn insert_if_absent(&mut self, name: &str, value: Variable) -> bool {
        match self.inner.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, Variable> {
        self.inner.iter()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.inner.keys().filter(|k| k.starts_with(prefix)).count()
    }

    /// Canonical JSON form (sorted keys, tagged values).
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl<'a> IntoIterator for &'a VariableMap {
    type Item = (&'a String, &'a Variable);
    type IntoIter = Iter<'a, String, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
