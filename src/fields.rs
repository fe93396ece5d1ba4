//! Declarative field definitions.
//!
//! The field source is plain data: a list of property groups, each pairing a
//! URL pattern with the ordered fields extracted from its response.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CycleError, Result};

const EMBEDDED_FIELDS: &str = include_str!("../assets/awattar_fields.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Decimal,
    Timestamp,
    Label,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Decimal => "decimal",
            FieldType::Timestamp => "timestamp",
            FieldType::Label => "label",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Target variable name.
    pub name: String,
    /// Key in the flattened response.
    pub source: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Add the configured price offset (decimal fields only).
    #[serde(default)]
    pub offset: bool,
}

impl FieldDefinition {
    pub fn new(name: &str, source: &str, kind: FieldType) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            kind,
            offset: false,
        }
    }

    pub fn with_offset(mut self) -> Self {
        self.offset = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyGroup {
    /// URL pattern for the request feeding `fields`.
    pub command: String,
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub properties: Vec<PropertyGroup>,
}

impl FieldSource {
    pub fn from_json(raw: &str) -> Result<Self> {
        let source: FieldSource = serde_json::from_str(raw)
            .map_err(|e| CycleError::Template(format!("field definitions: {}", e)))?;
        source.validate()?;
        Ok(source)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CycleError::Template(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Field definitions shipped with the crate.
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_FIELDS)
    }

    fn validate(&self) -> Result<()> {
        for group in &self.properties {
            if group.command.trim().is_empty() {
                return Err(CycleError::Template("property group without command".to_string()));
            }
            for field in &group.fields {
                if field.offset && field.kind != FieldType::Decimal {
                    return Err(CycleError::Template(format!(
                        "field '{}' asks for an offset but is a {}",
                        field.name,
                        field.kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn field_count(&self) -> usize {
        self.properties.iter().map(|p| p.fields.len()).sum()
    }
}
