use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use colloquy_core::{FallbackPolicy, OutputDomain, Predicate};

/// A declared point where the external reasoning capability selects a value
/// from a constrained domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideStep {
    #[serde(rename = "decide")]
    pub id: String,

    pub domain: OutputDomain,

    /// Context fields included in the request snapshot.
    #[serde(default)]
    pub using: Vec<String>,

    #[serde(default)]
    pub constraint: Option<String>,

    #[serde(default)]
    pub threshold: Option<f64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub fallback: FallbackPolicy,

    #[serde(default)]
    pub store_as: Option<String>,
}

/// A declared deterministic call into an external capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteStep {
    #[serde(rename = "execute")]
    pub capability: String,

    #[serde(default)]
    pub args: Value,

    #[serde(default)]
    pub retry: Option<RetrySpec>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub store_as: Option<String>,
}

/// Retry policy declared at the call site. The dispatcher executes exactly
/// this policy and records attempt counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub fallback_capability: Option<String>,
}

fn default_attempts() -> u32 {
    1
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: 0,
            fallback_capability: None,
        }
    }
}

/// One statement in a behavior block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Decide(DecideStep),

    Execute(ExecuteStep),

    Set {
        set: HashMap<String, Value>,
    },

    RecordAttempt {
        record_attempt: String,
    },

    Render {
        render: String,
        #[serde(default)]
        store_as: Option<String>,
    },

    Invoke {
        invoke: String,
    },

    Transition {
        transition_to: String,
    },

    Match {
        #[serde(rename = "match")]
        on: String,
        #[serde(default)]
        cases: HashMap<String, Vec<Step>>,
        #[serde(default)]
        default: Vec<Step>,
    },

    When {
        when: Predicate,
        #[serde(default)]
        then: Vec<Step>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Step>,
    },

    Repeat {
        repeat: u32,
        #[serde(rename = "do")]
        body: Vec<Step>,
    },
}

impl Step {
    /// Depth-first visit over this step and everything nested inside it.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Step)) {
        f(self);
        match self {
            Step::Match { cases, default, .. } => {
                for steps in cases.values() {
                    for step in steps {
                        step.visit(f);
                    }
                }
                for step in default {
                    step.visit(f);
                }
            }
            Step::When { then, otherwise, .. } => {
                for step in then.iter().chain(otherwise) {
                    step.visit(f);
                }
            }
            Step::Repeat { body, .. } => {
                for step in body {
                    step.visit(f);
                }
            }
            _ => {}
        }
    }
}

/// Visit every step in a block, including nested ones.
pub(crate) fn visit_steps<'a>(steps: &'a [Step], f: &mut dyn FnMut(&'a Step)) {
    for step in steps {
        step.visit(f);
    }
}
