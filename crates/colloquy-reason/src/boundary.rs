use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use colloquy_core::{
    AgentError, DecisionFailure, DecisionOutcome, DecisionPath, DecisionRequest, Reasoner, Result,
};
use colloquy_definition::DecideStep;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Isolates non-deterministic reasoning from the rest of the engine.
/// Builds typed requests, validates answers against the declared domain,
/// and resolves failures through the declared fallback policy.
pub struct DecisionBoundary {
    reasoner: Arc<dyn Reasoner>,
    default_timeout: Duration,
    default_threshold: f64,
}

impl DecisionBoundary {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            reasoner,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            default_threshold: 0.0,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Answer one decision. The context snapshot holds only the variables
    /// the spec names. Exactly one fallback application per decision; the
    /// outcome always records which path produced the value.
    pub async fn decide(
        &self,
        spec: &DecideStep,
        context: HashMap<String, Value>,
        constraint_holds: Option<bool>,
    ) -> Result<DecisionOutcome> {
        let request = DecisionRequest {
            id: spec.id.clone(),
            domain: spec.domain.clone(),
            context,
            constraint: spec.constraint.clone(),
            constraint_holds,
            fallback: spec.fallback.clone(),
        };

        let timeout = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let threshold = spec.threshold.unwrap_or(self.default_threshold);

        let (failure, confidence, detail) =
            match tokio::time::timeout(timeout, self.reasoner.answer(&request)).await {
                Err(_) => (DecisionFailure::Timeout, 0.0, format!("no answer in {:?}", timeout)),
                Ok(Err(e)) => (DecisionFailure::Unavailable, 0.0, e.to_string()),
                Ok(Ok(response)) => {
                    if let Err(reason) = spec.domain.check(&response.value) {
                        (DecisionFailure::Invalid, response.confidence, reason)
                    } else if response.confidence < threshold {
                        (
                            DecisionFailure::LowConfidence,
                            response.confidence,
                            format!("confidence {} below {}", response.confidence, threshold),
                        )
                    } else {
                        return Ok(DecisionOutcome {
                            id: spec.id.clone(),
                            value: response.value,
                            confidence: response.confidence,
                            path: DecisionPath::Answered,
                        });
                    }
                }
            };

        self.resolve_fallback(spec, failure, confidence, detail)
    }

    /// Fallback precedence: explicit value, then the strategy matching the
    /// failure kind, then propagation.
    fn resolve_fallback(
        &self,
        spec: &DecideStep,
        failure: DecisionFailure,
        confidence: f64,
        detail: String,
    ) -> Result<DecisionOutcome> {
        let resolved = if let Some(value) = &spec.fallback.value {
            Some((value.clone(), DecisionPath::FallbackValue))
        } else {
            match failure {
                DecisionFailure::LowConfidence => spec
                    .fallback
                    .on_low_confidence
                    .as_ref()
                    .map(|v| (v.clone(), DecisionPath::LowConfidence)),
                DecisionFailure::Timeout => spec
                    .fallback
                    .on_timeout
                    .as_ref()
                    .map(|v| (v.clone(), DecisionPath::Timeout)),
                _ => None,
            }
        };

        match resolved {
            Some((value, path)) => {
                tracing::debug!(
                    decision = %spec.id,
                    failure = %failure,
                    path = ?path,
                    "decision resolved via fallback"
                );
                Ok(DecisionOutcome {
                    id: spec.id.clone(),
                    value,
                    confidence,
                    path,
                })
            }
            None => Err(AgentError::decision(&spec.id, failure, detail)),
        }
    }
}
