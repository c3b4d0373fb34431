//! Persistence trait for conversation state

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ConversationState;

/// Persists per-session conversation state.
///
/// Saves must enforce monotonically increasing versions: a save whose
/// version is not exactly one greater than the stored version is rejected
/// with `AgentError::StaleVersion` rather than silently overwritten.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session's state. Returns `None` if the session does not exist.
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>>;
    /// Persist a session's state, enforcing the version check.
    async fn save(&self, state: &ConversationState) -> Result<()>;
    /// Remove a session's persisted state.
    async fn reset(&self, session_id: &str) -> Result<()>;
    /// List all stored session IDs.
    async fn list_sessions(&self) -> Result<Vec<String>>;
}
