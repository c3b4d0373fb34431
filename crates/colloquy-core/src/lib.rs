//! Core types and traits for the Colloquy agent runtime

pub mod error;
pub mod expr;
pub mod types;

mod traits;

pub use error::{AgentError, DecisionFailure, ExecutionFailure, FailureKind, Result};
pub use traits::capability::CapabilityAdapter;
pub use traits::reasoner::{DecisionRequest, DecisionResponse, Reasoner};
pub use traits::store::SessionStore;
pub use expr::Predicate;
pub use types::{
    AuditRecord, ConversationState, DecisionOutcome, DecisionPath, Event, FallbackPolicy, FreeText,
    OutputDomain, SessionStatus, StructureField, TurnOutcome, ERROR_EVENT, TIMEOUT_EVENT,
};
