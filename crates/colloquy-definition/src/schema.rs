use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use colloquy_core::{AgentError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub ty: FieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,
}

impl FieldSpec {
    fn is_numeric(&self) -> bool {
        matches!(self.ty, FieldType::Number | FieldType::Integer)
    }
}

/// Declared conversation-state fields. Writes of undeclared fields or
/// ill-typed values are rejected before they reach the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateSchema {
    #[serde(flatten)]
    pub fields: HashMap<String, FieldSpec>,
}

impl StateSchema {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Static consistency of the schema itself: patterns only on string
    /// fields, ranges only on numeric fields, and every pattern must
    /// compile.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.fields {
            if let Some(pattern) = &spec.pattern {
                if spec.ty != FieldType::String {
                    return Err(AgentError::InvalidDefinition(format!(
                        "field '{}' declares a pattern but is not a string",
                        name
                    )));
                }
                Regex::new(pattern).map_err(|e| {
                    AgentError::InvalidDefinition(format!(
                        "field '{}' has an invalid pattern: {}",
                        name, e
                    ))
                })?;
            }
            if (spec.min.is_some() || spec.max.is_some()) && !spec.is_numeric() {
                return Err(AgentError::InvalidDefinition(format!(
                    "field '{}' declares a range but is not numeric",
                    name
                )));
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(AgentError::InvalidDefinition(format!(
                        "field '{}' has an empty range [{}, {}]",
                        name, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check one pending field write against the declaration.
    pub fn check_write(&self, name: &str, value: &Value) -> Result<()> {
        let Some(spec) = self.fields.get(name) else {
            return Err(AgentError::SchemaViolation(format!(
                "field '{}' is not declared in the state schema",
                name
            )));
        };
        if value.is_null() {
            return Ok(());
        }
        if !spec.ty.accepts(value) {
            return Err(AgentError::SchemaViolation(format!(
                "field '{}' expects {:?}, got {}",
                name, spec.ty, value
            )));
        }
        if let (Some(pattern), Some(s)) = (&spec.pattern, value.as_str()) {
            let re = Regex::new(pattern)
                .map_err(|e| AgentError::SchemaViolation(format!("pattern for '{}': {}", name, e)))?;
            if !re.is_match(s) {
                return Err(AgentError::SchemaViolation(format!(
                    "field '{}' value '{}' does not match pattern '{}'",
                    name, s, pattern
                )));
            }
        }
        if let Some(n) = value.as_f64() {
            if spec.min.map(|min| n < min).unwrap_or(false)
                || spec.max.map(|max| n > max).unwrap_or(false)
            {
                return Err(AgentError::SchemaViolation(format!(
                    "field '{}' value {} outside range [{}, {}]",
                    name,
                    n,
                    spec.min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".into()),
                    spec.max.map(|m| m.to_string()).unwrap_or_else(|| "inf".into()),
                )));
            }
        }
        Ok(())
    }

    /// Required fields that are absent or null in the given map.
    pub fn missing_required<'a>(&'a self, fields: &HashMap<String, Value>) -> Vec<&'a str> {
        let mut missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|(name, spec)| {
                spec.required
                    && fields
                        .get(name.as_str())
                        .map(|v| v.is_null())
                        .unwrap_or(true)
            })
            .map(|(name, _)| name.as_str())
            .collect();
        missing.sort_unstable();
        missing
    }
}
