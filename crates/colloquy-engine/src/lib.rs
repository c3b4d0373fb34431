//! Per-session state machine engine

mod behavior;
mod engine;
mod replay;

pub use engine::{AgentEngine, EngineConfig};
pub use replay::{Expectations, Scenario, ScenarioReport, ScriptedAnswer};

pub use colloquy_core::{AuditRecord, ConversationState, Event, TurnOutcome};
