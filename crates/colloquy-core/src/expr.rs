//! Small, total expression evaluator over a session context snapshot.
//!
//! Supports path lookups (`fields.x`, `retries.f`, `turn`, `event.text`),
//! literal comparisons, and bare-path existence tests. Produces booleans
//! for guards and constraint predicates, strings for match keys. No loops,
//! no user-defined functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A guard or constraint predicate: a bare comparison expression, or an
/// `all`/`any`/`not`/`exists` composition over further predicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Predicate {
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Not { not: Box<Predicate> },
    Exists { exists: String },
    Expr(String),
}

impl Predicate {
    pub fn expr(source: impl Into<String>) -> Self {
        Predicate::Expr(source.into())
    }

    pub fn eval(&self, context: &Value) -> bool {
        match self {
            Predicate::Expr(expr) => eval_bool(expr, context),
            Predicate::All { all } => all.iter().all(|p| p.eval(context)),
            Predicate::Any { any } => any.iter().any(|p| p.eval(context)),
            Predicate::Not { not } => !not.eval(context),
            Predicate::Exists { exists } => {
                resolve_path(strip_braces(exists), context).is_some()
            }
        }
    }
}

/// Resolve a dotted path against a context object.
pub fn resolve_path<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn strip_braces(expr: &str) -> &str {
    let expr = expr.trim();
    if let Some(inner) = expr.strip_prefix("{{") {
        inner.strip_suffix("}}").unwrap_or(inner).trim()
    } else {
        expr
    }
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.len() >= 2 && ((raw.starts_with('"') && raw.ends_with('"')) || (raw.starts_with('\'') && raw.ends_with('\''))) {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        return serde_json::json!(n);
    }
    Value::String(raw.to_string())
}

fn resolve_operand(raw: &str, context: &Value) -> Option<Value> {
    let raw = raw.trim();
    if raw.starts_with('"') || raw.starts_with('\'') {
        return Some(parse_literal(raw));
    }
    if let Some(value) = resolve_path(raw, context) {
        return Some(value.clone());
    }
    Some(parse_literal(raw))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn compare_numeric(left: &Value, right: &Value, op: &str) -> bool {
    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return false;
    };
    match op {
        ">=" => l >= r,
        "<=" => l <= r,
        ">" => l > r,
        "<" => l < r,
        _ => false,
    }
}

/// Evaluate a guard or constraint predicate to a boolean. Unknown paths
/// resolve to false, never to an error.
pub fn eval_bool(expr: &str, context: &Value) -> bool {
    let expr = strip_braces(expr);
    if expr.is_empty() {
        return false;
    }

    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let left = &expr[..idx];
            let right = &expr[idx + op.len()..];
            let left_val = resolve_path(left.trim(), context).cloned();
            let right_val = resolve_operand(right, context);
            return match (op, left_val, right_val) {
                ("==", l, Some(r)) => l.as_ref() == Some(&r),
                ("!=", l, Some(r)) => l.as_ref() != Some(&r),
                (op, Some(l), Some(r)) => compare_numeric(&l, &r, op),
                _ => false,
            };
        }
    }

    // bare path: existence and truthiness
    truthy(resolve_path(expr, context))
}

/// Evaluate a match-key expression to a string. Non-string scalars render
/// via their JSON form; missing paths yield an empty key.
pub fn eval_key(expr: &str, context: &Value) -> String {
    let expr = strip_braces(expr);
    match resolve_path(expr, context) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
