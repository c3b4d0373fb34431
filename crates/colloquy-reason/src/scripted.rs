use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use colloquy_core::{AgentError, DecisionFailure, DecisionRequest, DecisionResponse, Reasoner, Result};

/// Deterministic stand-in for the reasoning capability. Answers from a
/// queued script, records every request, and can inject errors or latency.
#[derive(Clone, Default)]
pub struct ScriptedReasoner {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    responses: Vec<DecisionResponse>,
    response_index: usize,
    cycle_responses: bool,
    call_history: Vec<DecisionRequest>,
    should_error: bool,
    error_message: String,
    latency_ms: u64,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&mut self, response: DecisionResponse) {
        self.inner.write().responses.push(response);
    }

    pub fn add_answer(&mut self, value: Value, confidence: f64) {
        self.add_response(DecisionResponse::new(value, confidence));
    }

    pub fn set_responses(&mut self, responses: Vec<DecisionResponse>, cycle: bool) {
        let mut inner = self.inner.write();
        inner.responses = responses;
        inner.response_index = 0;
        inner.cycle_responses = cycle;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.should_error = true;
        inner.error_message = message.into();
    }

    pub fn clear_error(&mut self) {
        self.inner.write().should_error = false;
    }

    pub fn set_latency(&mut self, latency_ms: u64) {
        self.inner.write().latency_ms = latency_ms;
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().call_history.len()
    }

    pub fn call_history(&self) -> Vec<DecisionRequest> {
        self.inner.read().call_history.clone()
    }

    pub fn last_call(&self) -> Option<DecisionRequest> {
        self.inner.read().call_history.last().cloned()
    }

    pub fn reset(&mut self) {
        *self.inner.write() = Inner::default();
    }

    fn next_response(&self) -> Option<DecisionResponse> {
        let mut inner = self.inner.write();
        if inner.responses.is_empty() {
            return None;
        }
        let response = inner.responses[inner.response_index].clone();
        if inner.cycle_responses {
            inner.response_index = (inner.response_index + 1) % inner.responses.len();
        } else if inner.response_index < inner.responses.len() - 1 {
            inner.response_index += 1;
        }
        Some(response)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn answer(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        self.inner.write().call_history.push(request.clone());

        let latency_ms = self.inner.read().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }

        if self.inner.read().should_error {
            let message = self.inner.read().error_message.clone();
            return Err(AgentError::decision(
                &request.id,
                DecisionFailure::Unavailable,
                message,
            ));
        }

        self.next_response().ok_or_else(|| {
            AgentError::decision(
                &request.id,
                DecisionFailure::Unavailable,
                "script exhausted",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> DecisionRequest {
        DecisionRequest {
            id: id.into(),
            domain: colloquy_core::OutputDomain::Free(colloquy_core::types::FreeText::Text),
            context: Default::default(),
            constraint: None,
            constraint_holds: None,
            fallback: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_scripted_sequence() {
        let mut reasoner = ScriptedReasoner::new();
        reasoner.add_answer(json!("a"), 0.9);
        reasoner.add_answer(json!("b"), 0.8);

        let first = reasoner.answer(&request("d1")).await.unwrap();
        let second = reasoner.answer(&request("d2")).await.unwrap();
        // sticks at the last response once the script runs out
        let third = reasoner.answer(&request("d3")).await.unwrap();

        assert_eq!(first.value, json!("a"));
        assert_eq!(second.value, json!("b"));
        assert_eq!(third.value, json!("b"));
        assert_eq!(reasoner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_error_injection() {
        let mut reasoner = ScriptedReasoner::new();
        reasoner.set_error("backend down");
        let err = reasoner.answer(&request("d1")).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));

        reasoner.clear_error();
        reasoner.add_answer(json!("ok"), 1.0);
        assert!(reasoner.answer(&request("d2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_script_errors() {
        let reasoner = ScriptedReasoner::new();
        let err = reasoner.answer(&request("d1")).await.unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_cycle() {
        let mut reasoner = ScriptedReasoner::new();
        reasoner.set_responses(
            vec![
                DecisionResponse::new(json!("a"), 1.0),
                DecisionResponse::new(json!("b"), 1.0),
            ],
            true,
        );
        let mut values = Vec::new();
        for i in 0..4 {
            values.push(reasoner.answer(&request(&format!("d{}", i))).await.unwrap().value);
        }
        assert_eq!(values, vec![json!("a"), json!("b"), json!("a"), json!("b")]);
    }
}
