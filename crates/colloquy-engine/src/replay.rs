//! Deterministic scenario replay against a scripted reasoner

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use colloquy_core::{
    AuditRecord, ConversationState, DecisionPath, DecisionResponse, Event, Result, SessionStore,
    TurnOutcome,
};
use colloquy_definition::AgentDefinition;
use colloquy_exec::AdapterRegistry;
use colloquy_modules::{ModuleResolver, StaticResolver};
use colloquy_reason::ScriptedReasoner;
use colloquy_store::InMemoryStore;

use crate::engine::{AgentEngine, EngineConfig};

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedAnswer {
    pub value: Value,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// What a scenario asserts after the last turn.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Expectations {
    #[serde(default)]
    pub final_state: Option<String>,

    #[serde(default)]
    pub state_path: Option<Vec<String>>,

    #[serde(default)]
    pub fields: HashMap<String, Value>,

    #[serde(default)]
    pub decision_paths: Option<Vec<DecisionPath>>,

    #[serde(default)]
    pub executed: Option<Vec<String>>,

    #[serde(default)]
    pub terminal: Option<bool>,

    /// Lowest acceptable confidence across directly answered decisions.
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

/// A literal input (single query or ordered turns) plus the scripted
/// reasoner answers and the expected decisions, state path, actions, and
/// final values.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub input: Option<String>,

    #[serde(default)]
    pub turns: Vec<String>,

    #[serde(default)]
    pub script: Vec<ScriptedAnswer>,

    #[serde(default)]
    pub expect: Expectations,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub state: ConversationState,
    pub state_path: Vec<String>,
    pub replies: Vec<String>,
    pub outcomes: Vec<TurnOutcome>,
    pub failures: Vec<String>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Test helper: panic with every unmet expectation.
    pub fn assert_passed(&self) {
        if !self.passed() {
            panic!("scenario failed:\n  {}", self.failures.join("\n  "));
        }
    }
}

impl Scenario {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| colloquy_core::AgentError::Parse(e.to_string()))
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = Vec::new();
        if let Some(input) = &self.input {
            inputs.push(input.clone());
        }
        inputs.extend(self.turns.iter().cloned());
        inputs
    }

    pub async fn run(
        &self,
        definition: Arc<AgentDefinition>,
        adapters: AdapterRegistry,
    ) -> Result<ScenarioReport> {
        self.run_with_resolver(definition, adapters, Arc::new(StaticResolver::new()))
            .await
    }

    pub async fn run_with_resolver(
        &self,
        definition: Arc<AgentDefinition>,
        adapters: AdapterRegistry,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Result<ScenarioReport> {
        let mut reasoner = ScriptedReasoner::new();
        reasoner.set_responses(
            self.script
                .iter()
                .map(|a| DecisionResponse::new(a.value.clone(), a.confidence))
                .collect(),
            false,
        );

        let store = Arc::new(InMemoryStore::new());
        let engine = AgentEngine::new(
            definition,
            store.clone(),
            Arc::new(reasoner),
            adapters,
            resolver,
            EngineConfig::default(),
        );

        let session_id = format!("scenario-{}", self.name.replace(' ', "-"));
        let mut outcomes = vec![engine.start_session_with_id(&session_id).await?];
        for input in self.inputs() {
            outcomes.push(engine.deliver(&session_id, Event::user_message(input)).await?);
        }

        let state = store.load(&session_id).await?.ok_or_else(|| {
            colloquy_core::AgentError::Session("scenario session was not persisted".into())
        })?;

        let state_path: Vec<String> = outcomes
            .iter()
            .flat_map(|o| o.state_path.iter().cloned())
            .collect();
        let replies: Vec<String> = outcomes
            .iter()
            .flat_map(|o| o.replies.iter().cloned())
            .collect();

        let failures = self.evaluate(&state, &state_path, &outcomes);
        Ok(ScenarioReport {
            state,
            state_path,
            replies,
            outcomes,
            failures,
        })
    }

    fn evaluate(
        &self,
        state: &ConversationState,
        state_path: &[String],
        outcomes: &[TurnOutcome],
    ) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(expected) = &self.expect.final_state {
            if &state.current_state != expected {
                failures.push(format!(
                    "final state: expected '{}', got '{}'",
                    expected, state.current_state
                ));
            }
        }
        if let Some(expected) = &self.expect.state_path {
            if state_path != expected.as_slice() {
                failures.push(format!(
                    "state path: expected {:?}, got {:?}",
                    expected, state_path
                ));
            }
        }
        for (field, expected) in &self.expect.fields {
            match state.field(field) {
                Some(actual) if actual == expected => {}
                Some(actual) => failures.push(format!(
                    "field '{}': expected {}, got {}",
                    field, expected, actual
                )),
                None => failures.push(format!("field '{}': expected {}, absent", field, expected)),
            }
        }
        if let Some(expected) = &self.expect.decision_paths {
            let actual: Vec<DecisionPath> = outcomes
                .iter()
                .flat_map(|o| o.decisions().into_iter().map(|d| d.path))
                .collect();
            if &actual != expected {
                failures.push(format!(
                    "decision paths: expected {:?}, got {:?}",
                    expected, actual
                ));
            }
        }
        if let Some(expected) = &self.expect.executed {
            let actual: Vec<String> = outcomes
                .iter()
                .flat_map(|o| {
                    o.executed_capabilities()
                        .into_iter()
                        .map(|c| c.to_string())
                })
                .collect();
            if &actual != expected {
                failures.push(format!(
                    "executed capabilities: expected {:?}, got {:?}",
                    expected, actual
                ));
            }
        }
        if let Some(expected) = self.expect.terminal {
            let actual = outcomes.last().map(|o| o.terminal).unwrap_or(false);
            if actual != expected {
                failures.push(format!("terminal: expected {}, got {}", expected, actual));
            }
        }
        if let Some(threshold) = self.expect.min_confidence {
            for decision in outcomes.iter().flat_map(|o| o.decisions()) {
                if decision.path == DecisionPath::Answered && decision.confidence < threshold {
                    failures.push(format!(
                        "decision '{}': confidence {} below {}",
                        decision.id, decision.confidence, threshold
                    ));
                }
            }
        }

        let violations: Vec<&AuditRecord> = outcomes
            .iter()
            .flat_map(|o| o.audit.iter())
            .filter(|r| matches!(r, AuditRecord::Constraint { allowed: false, .. }))
            .collect();
        if !violations.is_empty() {
            failures.push(format!("{} constraint violations recorded", violations.len()));
        }

        failures
    }
}
