use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use colloquy_core::{CapabilityAdapter, ExecutionFailure, FailureKind};

/// Test adapter: answers from a queue and records every invocation.
#[derive(Clone)]
pub struct RecordingAdapter {
    id: String,
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    results: Vec<std::result::Result<Value, ExecutionFailure>>,
    result_index: usize,
    calls: Vec<Value>,
    latency_ms: u64,
}

impl RecordingAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub fn enqueue_ok(&self, value: Value) {
        self.inner.write().results.push(Ok(value));
    }

    pub fn enqueue_err(&self, kind: FailureKind, message: impl Into<String>) {
        let failure = ExecutionFailure::new(&self.id, kind, message);
        self.inner.write().results.push(Err(failure));
    }

    pub fn set_latency(&self, latency_ms: u64) {
        self.inner.write().latency_ms = latency_ms;
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().calls.len()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.inner.read().calls.clone()
    }

    pub fn last_call(&self) -> Option<Value> {
        self.inner.read().calls.last().cloned()
    }

    fn next_result(&self) -> std::result::Result<Value, ExecutionFailure> {
        let mut inner = self.inner.write();
        if inner.results.is_empty() {
            return Ok(Value::Null);
        }
        let index = inner.result_index.min(inner.results.len() - 1);
        if inner.result_index < inner.results.len() {
            inner.result_index += 1;
        }
        inner.results[index].clone()
    }
}

#[async_trait]
impl CapabilityAdapter for RecordingAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, args: Value) -> std::result::Result<Value, ExecutionFailure> {
        self.inner.write().calls.push(args);
        let latency_ms = self.inner.read().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }
        self.next_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let adapter = RecordingAdapter::new("crm");
        adapter.enqueue_ok(json!(1));
        adapter.enqueue_ok(json!(2));

        assert_eq!(adapter.invoke(json!({ "a": 1 })).await.unwrap(), json!(1));
        assert_eq!(adapter.invoke(json!({ "b": 2 })).await.unwrap(), json!(2));
        // sticks at the last queued result
        assert_eq!(adapter.invoke(json!({})).await.unwrap(), json!(2));

        assert_eq!(adapter.call_count(), 3);
        assert_eq!(adapter.calls()[0], json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_empty_queue_returns_null() {
        let adapter = RecordingAdapter::new("crm");
        assert_eq!(adapter.invoke(json!({})).await.unwrap(), Value::Null);
    }
}
