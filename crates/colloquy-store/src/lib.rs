//! Conversation state stores

mod file;
mod memory;

pub use colloquy_core::{ConversationState, SessionStore};
pub use file::FileStore;
pub use memory::InMemoryStore;

fn check_version(
    session_id: &str,
    stored: Option<u64>,
    attempted: u64,
) -> colloquy_core::Result<()> {
    match stored {
        Some(stored) if attempted != stored + 1 => Err(colloquy_core::AgentError::StaleVersion {
            session: session_id.to_string(),
            attempted,
            stored,
        }),
        _ => Ok(()),
    }
}
