//! Flattening of a JSON document into a single-level key/value map.
//!
//! Object members are joined with `_`, array elements use their index, so
//! `{"data":[{"marketprice":95.5}]}` becomes `data_0_marketprice = 95.5`.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::Result;

/// Scalar leaf of a flattened response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    /// Number in its exact textual JSON form.
    Number(String),
}

impl RawValue {
    pub fn as_str(&self) -> &str {
        match self {
            RawValue::Text(s) | RawValue::Number(s) => s,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RawMap = BTreeMap<String, RawValue>;

/// Parse `body` and flatten it.
pub fn flatten_json_str(body: &str) -> Result<RawMap> {
    let value: Value = serde_json::from_str(body)?;
    Ok(flatten_value(&value))
}

pub fn flatten_value(value: &Value) -> RawMap {
    let mut out = RawMap::new();
    walk(value, String::new(), &mut out);
    out
}

fn child_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", prefix, name)
    }
}

fn walk(value: &Value, prefix: String, out: &mut RawMap) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, child_key(&prefix, k), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(v, child_key(&prefix, &i.to_string()), out);
            }
        }
        Value::String(s) => {
            out.insert(prefix, RawValue::Text(s.clone()));
        }
        Value::Number(n) => {
            out.insert(prefix, RawValue::Number(n.to_string()));
        }
        Value::Bool(b) => {
            out.insert(prefix, RawValue::Text(b.to_string()));
        }
        Value::Null => {}
    }
}
