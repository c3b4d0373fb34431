//! Colloquy: a runtime for state-machine dialogue agents.
//!
//! A definition loader compiles the YAML notation into an immutable
//! [`definition::AgentDefinition`]; the [`engine::AgentEngine`] drives
//! per-session state machines over it, delegating non-deterministic
//! decisions to a pluggable reasoner and deterministic side effects to
//! bound capability adapters.

mod builder;

pub use builder::AgentBuilder;

pub mod error {
    pub use colloquy_core::{AgentError, DecisionFailure, ExecutionFailure, FailureKind, Result};
}

pub mod definition {
    pub use colloquy_definition::{
        load, load_module, split_qualified, ActionMatcher, AgentDefinition, AgentProfile,
        ConstraintRule, DecideStep, EventHandler, ExecuteStep, FieldSpec, FieldType,
        ModuleDefinition, ModuleLocator, RetrySpec, StateDefinition, StateSchema, Step,
        SUPPORTED_VERSION,
    };
}

pub mod engine {
    pub use colloquy_engine::{
        AgentEngine, EngineConfig, Expectations, Scenario, ScenarioReport, ScriptedAnswer,
    };
}

pub mod session {
    pub use colloquy_core::{
        AuditRecord, ConversationState, DecisionOutcome, DecisionPath, Event, SessionStatus,
        SessionStore, TurnOutcome, ERROR_EVENT, TIMEOUT_EVENT,
    };
    pub use colloquy_store::{FileStore, InMemoryStore};
}

pub mod reason {
    pub use colloquy_core::{
        DecisionRequest, DecisionResponse, FallbackPolicy, FreeText, OutputDomain, Reasoner,
        StructureField,
    };
    pub use colloquy_reason::{DecisionBoundary, ScriptedReasoner};
}

pub mod exec {
    pub use colloquy_core::CapabilityAdapter;
    pub use colloquy_exec::{AdapterRegistry, Dispatcher, RecordingAdapter};
}

pub mod modules {
    pub use colloquy_modules::{
        DirResolver, Module, ModuleLoader, ModuleLocator, ModuleResolver, Namespace,
        StaticResolver,
    };
}

pub mod constraints {
    pub use colloquy_constraints::{Action, ConstraintEnforcer};
    pub use colloquy_core::Predicate;
}

pub mod template {
    pub use colloquy_template::{render_str, render_value, TemplateRegistry};
}
