use async_trait::async_trait;
use std::path::{Path, PathBuf};

use colloquy_core::{AgentError, ConversationState, Result, SessionStore};

/// One JSON document per session under a base directory.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AgentError::Session(format!(
                "invalid session id '{}'",
                session_id
            )));
        }
        Ok(self.base_dir.join(format!("{}.json", session_id)))
    }

    fn read_state(path: &Path) -> Result<Option<ConversationState>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let state = serde_json::from_str(&content)
            .map_err(|e| AgentError::Session(format!("corrupt session file {:?}: {}", path, e)))?;
        Ok(Some(state))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let path = self.session_path(session_id)?;
        Self::read_state(&path)
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let path = self.session_path(&state.session_id)?;
        let stored = Self::read_state(&path)?.map(|s| s.version);
        super::check_version(&state.session_id, stored, state.version)?;

        std::fs::create_dir_all(&self.base_dir)?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::Session(e.to_string()))?;

        // write-then-rename so a crashed save never leaves a torn document
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(session = %state.session_id, version = state.version, "session saved");
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    sessions.push(stem.to_string());
                }
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::AgentError;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut state = ConversationState::new("s1", "greeting");
        state.version = 1;
        state.set_field("customer_id", serde_json::json!("12345678"));
        store.save(&state).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.field("customer_id"), Some(&serde_json::json!("12345678")));
        assert_eq!(store.list_sessions().await.unwrap(), vec!["s1".to_string()]);

        store.reset("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut state = ConversationState::new("s1", "greeting");
        state.version = 1;
        store.save(&state).await.unwrap();
        let err = store.save(&state).await.unwrap_err();
        assert!(matches!(err, AgentError::StaleVersion { .. }));
    }

    #[tokio::test]
    async fn test_invalid_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load("../escape").await.is_err());
    }
}
