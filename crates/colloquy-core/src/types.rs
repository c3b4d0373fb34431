use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Event name the engine synthesizes when a state's dwell time is exceeded.
pub const TIMEOUT_EVENT: &str = "timeout";

/// Event name the engine synthesizes when a decision or execution fails
/// with no local recovery policy.
pub const ERROR_EVENT: &str = "error";

/// An external stimulus delivered to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self {
            name: "user_message".into(),
            payload: serde_json::json!({ "text": text.into() }),
        }
    }

    pub fn timeout() -> Self {
        Self::named(TIMEOUT_EVENT)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: ERROR_EVENT.into(),
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Terminated,
}

/// Per-session data carried across turns. Passed by value into and out of
/// each processing step; persisted with an optimistic-concurrency version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub current_state: String,
    #[serde(default)]
    pub status: SessionStatus,
    pub version: u64,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    #[serde(default)]
    pub retries: HashMap<String, u32>,
    #[serde(default)]
    pub turn_count: u32,
    pub entered_at: DateTime<Utc>,
    #[serde(default)]
    pub obligations: Vec<String>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>, initial_state: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_state: initial_state.into(),
            status: SessionStatus::Active,
            version: 0,
            fields: HashMap::new(),
            retries: HashMap::new(),
            turn_count: 0,
            entered_at: Utc::now(),
            obligations: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn retry_count(&self, field: &str) -> u32 {
        self.retries.get(field).copied().unwrap_or(0)
    }

    pub fn bump_retry(&mut self, field: impl Into<String>) -> u32 {
        let count = self.retries.entry(field.into()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_retry(&mut self, field: &str) {
        self.retries.remove(field);
    }

    pub fn enter_state(&mut self, state: impl Into<String>, now: DateTime<Utc>) {
        self.current_state = state.into();
        self.entered_at = now;
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }
}

/// Declared shape of a decision's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutputDomain {
    Enumeration {
        one_of: Vec<String>,
    },
    Range {
        min: f64,
        max: f64,
        #[serde(default)]
        integer: bool,
    },
    Structure {
        fields: HashMap<String, StructureField>,
        #[serde(default)]
        required: Vec<String>,
    },
    Free(FreeText),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FreeText {
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StructureField {
    String,
    Number,
    Integer,
    Boolean,
}

impl StructureField {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            StructureField::String => value.is_string(),
            StructureField::Number => value.is_number(),
            StructureField::Integer => value.is_i64() || value.is_u64(),
            StructureField::Boolean => value.is_boolean(),
        }
    }
}

impl OutputDomain {
    /// Check a returned value against the declared domain. Out-of-range
    /// numerics are rejected, never clamped.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            OutputDomain::Enumeration { one_of } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected one of {:?}, got {}", one_of, value))?;
                if one_of.iter().any(|opt| opt == s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of {:?}", s, one_of))
                }
            }
            OutputDomain::Range { min, max, integer } => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {}", value))?;
                if *integer && n.fract() != 0.0 {
                    return Err(format!("expected an integer, got {}", n));
                }
                if n < *min || n > *max {
                    return Err(format!("{} outside range [{}, {}]", n, min, max));
                }
                Ok(())
            }
            OutputDomain::Structure { fields, required } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("expected a structure, got {}", value))?;
                for name in required {
                    if !obj.contains_key(name) {
                        return Err(format!("missing required field '{}'", name));
                    }
                }
                for (name, v) in obj {
                    match fields.get(name) {
                        Some(ty) if ty.accepts(v) => {}
                        Some(ty) => {
                            return Err(format!("field '{}' is not a {:?}", name, ty));
                        }
                        None => return Err(format!("undeclared field '{}'", name)),
                    }
                }
                Ok(())
            }
            OutputDomain::Free(_) => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected text, got {}", value))
                }
            }
        }
    }
}

/// Concrete values used when a decision cannot be answered directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FallbackPolicy {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub on_low_confidence: Option<Value>,
    #[serde(default)]
    pub on_timeout: Option<Value>,
}

impl FallbackPolicy {
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.on_low_confidence.is_none() && self.on_timeout.is_none()
    }
}

/// Which path produced a decision's value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    Answered,
    FallbackValue,
    LowConfidence,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionOutcome {
    pub id: String,
    pub value: Value,
    pub confidence: f64,
    pub path: DecisionPath,
}

/// One attributable entry in a session's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    Transition {
        from: String,
        to: String,
        reason: String,
    },
    Decision {
        outcome: DecisionOutcome,
    },
    Execution {
        capability: String,
        attempt: u32,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    UnhandledEvent {
        event: String,
        state: String,
    },
    Constraint {
        detail: String,
        allowed: bool,
    },
    ModuleLoaded {
        module: String,
    },
}

/// What one delivered event produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub replies: Vec<String>,
    pub state_path: Vec<String>,
    pub terminal: bool,
    pub audit: Vec<AuditRecord>,
}

impl TurnOutcome {
    pub fn decisions(&self) -> Vec<&DecisionOutcome> {
        self.audit
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Decision { outcome } => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn executed_capabilities(&self) -> Vec<&str> {
        self.audit
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Execution {
                    capability,
                    success: true,
                    ..
                } => Some(capability.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enumeration_exact_match() {
        let domain = OutputDomain::Enumeration {
            one_of: vec!["billing".into(), "technical".into()],
        };
        assert!(domain.check(&json!("billing")).is_ok());
        assert!(domain.check(&json!("Billing")).is_err());
        assert!(domain.check(&json!(1)).is_err());
    }

    #[test]
    fn test_range_rejects_out_of_range() {
        let domain = OutputDomain::Range {
            min: 0.0,
            max: 10.0,
            integer: false,
        };
        assert!(domain.check(&json!(5.5)).is_ok());
        assert!(domain.check(&json!(10.0)).is_ok());
        assert!(domain.check(&json!(10.1)).is_err());
        assert!(domain.check(&json!(-0.1)).is_err());
    }

    #[test]
    fn test_range_integer() {
        let domain = OutputDomain::Range {
            min: 1.0,
            max: 5.0,
            integer: true,
        };
        assert!(domain.check(&json!(3)).is_ok());
        assert!(domain.check(&json!(3.5)).is_err());
    }

    #[test]
    fn test_structure_required_fields() {
        let mut fields = HashMap::new();
        fields.insert("amount".to_string(), StructureField::Number);
        fields.insert("reason".to_string(), StructureField::String);
        let domain = OutputDomain::Structure {
            fields,
            required: vec!["amount".into()],
        };
        assert!(domain.check(&json!({ "amount": 75.5 })).is_ok());
        assert!(domain.check(&json!({ "reason": "dup" })).is_err());
        assert!(domain.check(&json!({ "amount": "not a number" })).is_err());
        assert!(domain.check(&json!({ "amount": 1.0, "extra": true })).is_err());
    }

    #[test]
    fn test_domain_yaml_forms() {
        let d: OutputDomain = serde_yaml::from_str("one_of: [a, b]").unwrap();
        assert!(matches!(d, OutputDomain::Enumeration { .. }));

        let d: OutputDomain = serde_yaml::from_str("{ min: 0, max: 10, integer: true }").unwrap();
        assert!(matches!(d, OutputDomain::Range { integer: true, .. }));

        let d: OutputDomain = serde_yaml::from_str("text").unwrap();
        assert!(matches!(d, OutputDomain::Free(FreeText::Text)));
    }

    #[test]
    fn test_conversation_state_retries() {
        let mut state = ConversationState::new("s1", "greeting");
        assert_eq!(state.retry_count("customer_id"), 0);
        state.bump_retry("customer_id");
        state.bump_retry("customer_id");
        assert_eq!(state.retry_count("customer_id"), 2);
        state.clear_retry("customer_id");
        assert_eq!(state.retry_count("customer_id"), 0);
    }

    #[test]
    fn test_event_text() {
        let event = Event::user_message("hello");
        assert_eq!(event.name, "user_message");
        assert_eq!(event.text(), Some("hello"));
        assert!(Event::timeout().text().is_none());
    }
}
