//! Template rendering over session context

use minijinja::Environment;
use serde_json::Value;
use std::collections::HashMap;

use colloquy_core::{AgentError, Result};

/// Named templates rendered against a session context. Module-qualified
/// names are merged in by the module loader.
#[derive(Default, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn render(&self, name: &str, context: &Value) -> Result<String> {
        let source = self.templates.get(name).ok_or_else(|| {
            AgentError::InvalidDefinition(format!("unknown template '{}'", name))
        })?;
        render_str(source, context)
    }
}

/// Render a template source directly against a context value.
pub fn render_str(source: &str, context: &Value) -> Result<String> {
    let env = Environment::new();
    let tmpl = env
        .template_from_str(source)
        .map_err(|e| AgentError::Template(format!("template parse error: {}", e)))?;
    tmpl.render(context)
        .map_err(|e| AgentError::Template(format!("template render error: {}", e)))
}

/// Recursively render every string leaf of an argument value. Non-string
/// leaves pass through unchanged.
pub fn render_value(value: &Value, context: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            if s.contains("{{") || s.contains("{%") {
                Ok(Value::String(render_str(s, context)?))
            } else {
                Ok(value.clone())
            }
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, context)?);
            }
            Ok(Value::Object(rendered))
        }
        Value::Array(arr) => {
            let rendered: Result<Vec<_>> = arr.iter().map(|v| render_value(v, context)).collect();
            Ok(Value::Array(rendered?))
        }
        other => Ok(other.clone()),
    }
}
