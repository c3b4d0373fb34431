use std::path::Path;
use std::sync::Arc;

use colloquy_core::{AgentError, CapabilityAdapter, Reasoner, Result, SessionStore};
use colloquy_definition::AgentDefinition;
use colloquy_engine::{AgentEngine, EngineConfig};
use colloquy_exec::AdapterRegistry;
use colloquy_modules::{DirResolver, ModuleResolver};
use colloquy_store::InMemoryStore;

/// Assembles an [`AgentEngine`] from a definition and its collaborators.
/// The store defaults to in-memory and module resolution to the `modules/`
/// search path; the reasoner must be supplied.
pub struct AgentBuilder {
    definition: Option<Arc<AgentDefinition>>,
    store: Option<Arc<dyn SessionStore>>,
    reasoner: Option<Arc<dyn Reasoner>>,
    adapters: AdapterRegistry,
    resolver: Option<Arc<dyn ModuleResolver>>,
    config: EngineConfig,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            definition: None,
            store: None,
            reasoner: None,
            adapters: AdapterRegistry::new(),
            resolver: None,
            config: EngineConfig::default(),
        }
    }

    pub fn from_definition(definition: AgentDefinition) -> Self {
        let mut builder = Self::new();
        builder.definition = Some(Arc::new(definition));
        builder
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(Self::from_definition(AgentDefinition::from_yaml(source)?))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn CapabilityAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AgentEngine> {
        let definition = self
            .definition
            .ok_or_else(|| AgentError::InvalidDefinition("no agent definition supplied".into()))?;
        let reasoner = self
            .reasoner
            .ok_or_else(|| AgentError::InvalidDefinition("no reasoner configured".into()))?;

        // wiring completeness: every bound adapter id must be registered
        for (capability, adapter_id) in &definition.resources {
            if !self.adapters.contains(adapter_id) {
                return Err(AgentError::InvalidDefinition(format!(
                    "capability '{}' is bound to unregistered adapter '{}'",
                    capability, adapter_id
                )));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(DirResolver::new()));

        Ok(AgentEngine::new(
            definition,
            store,
            reasoner,
            self.adapters,
            resolver,
            self.config,
        ))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::Event;
    use colloquy_exec::RecordingAdapter;
    use colloquy_reason::ScriptedReasoner;

    const AGENT: &str = r#"
version: 1
agent: { role: "echo" }
resources:
  log: log_adapter
state_schema:
  last: { type: string }
states:
  listening:
    initial: true
    on_event:
      - event: user_message
        do:
          - set: { last: "{{ event.text }}" }
          - execute: log
            args: { text: "{{ event.text }}" }
"#;

    #[tokio::test]
    async fn test_build_and_run() {
        let adapter = RecordingAdapter::new("log_adapter");
        let engine = AgentBuilder::from_yaml(AGENT)
            .unwrap()
            .with_reasoner(Arc::new(ScriptedReasoner::new()))
            .with_adapter(Arc::new(adapter.clone()))
            .build()
            .unwrap();

        let (session, _) = engine.start_session().await.unwrap();
        engine
            .deliver(&session, Event::user_message("hello"))
            .await
            .unwrap();

        assert_eq!(adapter.call_count(), 1);
        assert_eq!(
            adapter.last_call().unwrap(),
            serde_json::json!({ "text": "hello" })
        );
    }

    #[test]
    fn test_missing_reasoner() {
        let err = AgentBuilder::from_yaml(AGENT).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("no reasoner configured"));
    }

    #[test]
    fn test_unregistered_adapter() {
        let err = AgentBuilder::from_yaml(AGENT)
            .unwrap()
            .with_reasoner(Arc::new(ScriptedReasoner::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unregistered adapter"));
    }
}
