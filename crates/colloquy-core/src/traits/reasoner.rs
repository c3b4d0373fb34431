//! Boundary to the external reasoning capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{FallbackPolicy, OutputDomain};

/// One typed request to the reasoning capability. Carries only the context
/// values the decision names, never the whole conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub id: String,
    pub domain: OutputDomain,
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub constraint: Option<String>,
    #[serde(default)]
    pub constraint_holds: Option<bool>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionResponse {
    pub value: Value,
    pub confidence: f64,
}

impl DecisionResponse {
    pub fn new(value: Value, confidence: f64) -> Self {
        Self { value, confidence }
    }
}

/// The reasoning capability. Production wiring answers with a live service;
/// test wiring answers from a script. Both satisfy this contract.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn answer(&self, request: &DecisionRequest) -> Result<DecisionResponse>;
}
