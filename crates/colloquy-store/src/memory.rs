use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use colloquy_core::{ConversationState, Result, SessionStore};

/// In-process store. The default for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let mut sessions = self.sessions.write();
        let stored = sessions.get(&state.session_id).map(|s| s.version);
        super::check_version(&state.session_id, stored, state.version)?;
        sessions.insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.sessions.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::AgentError;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = InMemoryStore::new();
        let mut state = ConversationState::new("s1", "greeting");
        state.version = 1;
        store.save(&state).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.current_state, "greeting");
        assert_eq!(loaded.version, 1);
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let store = InMemoryStore::new();
        let mut state = ConversationState::new("s1", "greeting");
        state.version = 1;
        store.save(&state).await.unwrap();

        // same version again: a lost-update attempt
        let err = store.save(&state).await.unwrap_err();
        assert!(matches!(err, AgentError::StaleVersion { stored: 1, .. }));

        state.version = 2;
        store.save(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_removes_session() {
        let store = InMemoryStore::new();
        let mut state = ConversationState::new("s1", "greeting");
        state.version = 1;
        store.save(&state).await.unwrap();
        store.reset("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
