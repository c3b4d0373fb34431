use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constraint::ConstraintRule;
use crate::schema::StateSchema;
use crate::step::Step;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub role: String,

    #[serde(default)]
    pub objective: Option<String>,
}

/// Where a module's source comes from: bundled with the agent, or resolved
/// at run time from an external catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ModuleLocator {
    Bundled { bundled: String },
    Catalog { catalog: String },
}

impl ModuleLocator {
    pub fn bundled(name: impl Into<String>) -> Self {
        ModuleLocator::Bundled {
            bundled: name.into(),
        }
    }

    pub fn catalog(key: impl Into<String>) -> Self {
        ModuleLocator::Catalog {
            catalog: key.into(),
        }
    }
}

impl std::fmt::Display for ModuleLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleLocator::Bundled { bundled } => write!(f, "bundled:{}", bundled),
            ModuleLocator::Catalog { catalog } => write!(f, "catalog:{}", catalog),
        }
    }
}

/// A behavior block bound to an event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHandler {
    pub event: String,

    #[serde(rename = "do")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateDefinition {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub initial: bool,

    #[serde(default, rename = "final")]
    pub is_final: bool,

    /// Allowed successor state names. A transition to anything else is a
    /// fatal error, never coerced.
    #[serde(default)]
    pub transitions: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Transition to the single allowed successor once the enter hook
    /// completes without issuing its own transition.
    #[serde(default)]
    pub auto_transition: bool,

    #[serde(default)]
    pub on_enter: Vec<Step>,

    #[serde(default)]
    pub on_exit: Vec<Step>,

    #[serde(default)]
    pub on_event: Vec<EventHandler>,

    /// Runs when the state is entered as a final state, before the session
    /// is marked terminated.
    #[serde(default)]
    pub cleanup: Vec<Step>,
}

impl StateDefinition {
    pub fn allows_transition(&self, target: &str) -> bool {
        self.transitions.iter().any(|t| t == target)
    }

    pub fn handler_for(&self, event: &str) -> Option<&EventHandler> {
        self.on_event.iter().find(|h| h.event == event)
    }
}

/// Immutable, compiled agent definition. Produced once by the loader and
/// shared read-only by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub version: u32,

    pub agent: AgentProfile,

    /// Capability name -> adapter id.
    #[serde(default)]
    pub resources: HashMap<String, String>,

    #[serde(default)]
    pub state_schema: StateSchema,

    pub states: HashMap<String, StateDefinition>,

    /// State-agnostic handlers, consulted after state-scoped ones.
    #[serde(default)]
    pub global_handlers: Vec<EventHandler>,

    /// Named, invokable blocks.
    #[serde(default)]
    pub behaviors: HashMap<String, Vec<Step>>,

    #[serde(default)]
    pub templates: HashMap<String, String>,

    #[serde(default)]
    pub constraints: Vec<ConstraintRule>,

    /// Module name -> locator, loadable on demand.
    #[serde(default)]
    pub modules: HashMap<String, ModuleLocator>,
}

impl AgentDefinition {
    pub fn initial_state(&self) -> &str {
        self.states
            .iter()
            .find(|(_, def)| def.initial)
            .map(|(name, _)| name.as_str())
            .unwrap_or_default()
    }

    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    pub fn global_handler_for(&self, event: &str) -> Option<&EventHandler> {
        self.global_handlers.iter().find(|h| h.event == event)
    }
}

/// A loadable unit of exported templates and behaviors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub version: u32,

    #[serde(rename = "module")]
    pub name: String,

    #[serde(default)]
    pub templates: HashMap<String, String>,

    #[serde(default)]
    pub behaviors: HashMap<String, Vec<Step>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_forms() {
        let locator: ModuleLocator = serde_yaml::from_str("bundled: forms").unwrap();
        assert_eq!(locator, ModuleLocator::bundled("forms"));
        assert_eq!(locator.to_string(), "bundled:forms");

        let locator: ModuleLocator = serde_yaml::from_str("catalog: escalation-v2").unwrap();
        assert_eq!(locator, ModuleLocator::catalog("escalation-v2"));
    }

    #[test]
    fn test_state_definition_lookup() {
        let state: StateDefinition = serde_yaml::from_str(
            r#"
transitions: [collect_id, escalation]
on_event:
  - event: user_message
    do:
      - transition_to: collect_id
"#,
        )
        .unwrap();
        assert!(state.allows_transition("collect_id"));
        assert!(!state.allows_transition("done"));
        assert!(state.handler_for("user_message").is_some());
        assert!(state.handler_for("cancel").is_none());
    }
}
