//! Adapter trait for external resources

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExecutionFailure;

/// Deterministic side-effecting interface bound to a capability name.
/// Adapters never touch conversation state; results flow back through the
/// behavior that issued the call.
#[async_trait]
pub trait CapabilityAdapter: Send + Sync {
    fn id(&self) -> &str;

    async fn invoke(&self, args: Value) -> std::result::Result<Value, ExecutionFailure>;
}
