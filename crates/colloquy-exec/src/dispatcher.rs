use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use colloquy_core::{AuditRecord, ExecutionFailure, FailureKind, Result};
use colloquy_definition::RetrySpec;

use crate::registry::AdapterRegistry;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Resolves capability names through their resource bindings and invokes
/// the bound adapters. Executes exactly the retry policy it is handed and
/// records every attempt; never touches conversation state.
pub struct Dispatcher {
    registry: AdapterRegistry,
    /// Capability name -> adapter id, from the definition's resources.
    bindings: HashMap<String, String>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: AdapterRegistry, bindings: HashMap<String, String>) -> Self {
        Self {
            registry,
            bindings,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        capability: &str,
        args: Value,
        retry: Option<&RetrySpec>,
        timeout_ms: Option<u64>,
        audit: &mut Vec<AuditRecord>,
    ) -> Result<Value> {
        let policy = retry.cloned().unwrap_or_default();
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut last_failure = None;
        for attempt in 1..=policy.attempts {
            match self.invoke_once(capability, args.clone(), timeout).await {
                Ok(result) => {
                    audit.push(AuditRecord::Execution {
                        capability: capability.to_string(),
                        attempt,
                        success: true,
                        error: None,
                    });
                    return Ok(result);
                }
                Err(failure) => {
                    tracing::warn!(
                        capability,
                        attempt,
                        error = %failure,
                        "capability invocation failed"
                    );
                    audit.push(AuditRecord::Execution {
                        capability: capability.to_string(),
                        attempt,
                        success: false,
                        error: Some(failure.to_string()),
                    });
                    last_failure = Some(failure);
                    if attempt < policy.attempts && policy.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;
                    }
                }
            }
        }

        if let Some(fallback) = &policy.fallback_capability {
            tracing::info!(capability, fallback, "retries exhausted, using fallback capability");
            match self.invoke_once(fallback, args, timeout).await {
                Ok(result) => {
                    audit.push(AuditRecord::Execution {
                        capability: fallback.clone(),
                        attempt: 1,
                        success: true,
                        error: None,
                    });
                    return Ok(result);
                }
                Err(failure) => {
                    audit.push(AuditRecord::Execution {
                        capability: fallback.clone(),
                        attempt: 1,
                        success: false,
                        error: Some(failure.to_string()),
                    });
                    return Err(failure.into());
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| {
                ExecutionFailure::new(capability, FailureKind::Other, "no attempts executed")
            })
            .into())
    }

    async fn invoke_once(
        &self,
        capability: &str,
        args: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, ExecutionFailure> {
        let adapter_id = self.bindings.get(capability).ok_or_else(|| {
            ExecutionFailure::new(capability, FailureKind::NotFound, "no resource binding")
        })?;
        let adapter = self.registry.get(adapter_id).ok_or_else(|| {
            ExecutionFailure::new(
                capability,
                FailureKind::NotFound,
                format!("adapter '{}' is not registered", adapter_id),
            )
        })?;

        match tokio::time::timeout(timeout, adapter.invoke(args)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionFailure::new(
                capability,
                FailureKind::Network,
                format!("timed out after {:?}", timeout),
            )),
        }
    }
}
