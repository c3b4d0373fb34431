//! Decision boundary: request construction, response validation, fallback

mod boundary;
mod scripted;

pub use boundary::DecisionBoundary;
pub use colloquy_core::{DecisionRequest, DecisionResponse, Reasoner};
pub use scripted::ScriptedReasoner;
