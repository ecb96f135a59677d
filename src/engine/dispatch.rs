// SPDX-License-Identifier: MIT

//! Execution Dispatcher
//!
//! The only component with real side effects. Runs a validated
//! invocation plan in order, short-circuiting on the first hard
//! failure while keeping every result and evidence reference already
//! collected. Each invocation carries its own timeout; a timeout is a
//! hard failure like any other.

use crate::backend::find_spec;
use crate::backend::registry::BackendRegistry;
use crate::engine::types::{ExecutionResult, InvocationPlan, InvocationResult};
use serde_json::Value;
use std::time::Duration;

pub struct Dispatcher<'a> {
    registry: &'a BackendRegistry,
    invocation_timeout: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a BackendRegistry, invocation_timeout: Duration) -> Self {
        Self {
            registry,
            invocation_timeout,
        }
    }

    /// Execute the plan. Infallible at the signature level: every
    /// failure mode is captured inside the [ExecutionResult] so the
    /// verifier and replanner see the full trace.
    pub async fn execute(&self, plan: &InvocationPlan) -> ExecutionResult {
        let mut results = Vec::with_capacity(plan.invocations.len());

        let backend = match self.registry.get(&plan.backend).await {
            Some(backend) => backend,
            None => {
                results.push(InvocationResult {
                    invocation: plan
                        .invocations
                        .first()
                        .map(|i| i.name.clone())
                        .unwrap_or_default(),
                    success: false,
                    output: Value::Null,
                    error: Some(format!("backend '{}' not registered", plan.backend)),
                    evidence: None,
                });
                return ExecutionResult {
                    results,
                    success: false,
                };
            }
        };

        for invocation in &plan.invocations {
            // Catalog membership was validated at planning time; the
            // pre-dispatch re-check catches catalogs that changed in
            // between (an MCP server restarting with fewer tools).
            if find_spec(backend.catalog(), &invocation.name).is_none() {
                results.push(InvocationResult {
                    invocation: invocation.name.clone(),
                    success: false,
                    output: Value::Null,
                    error: Some(format!(
                        "invocation '{}' no longer in '{}' catalog",
                        invocation.name, plan.backend
                    )),
                    evidence: None,
                });
                return ExecutionResult {
                    results,
                    success: false,
                };
            }

            log::info!(
                "Dispatching {}::{} {:?}",
                plan.backend,
                invocation.name,
                invocation.parameters
            );

            let outcome = tokio::time::timeout(
                self.invocation_timeout,
                backend.invoke(&invocation.name, invocation.parameters.clone()),
            )
            .await;

            let result = match outcome {
                Ok(Ok(outcome)) => InvocationResult {
                    invocation: invocation.name.clone(),
                    success: outcome.success,
                    output: outcome.output,
                    error: outcome.error,
                    evidence: outcome.evidence,
                },
                Ok(Err(e)) => InvocationResult {
                    invocation: invocation.name.clone(),
                    success: false,
                    output: Value::Null,
                    error: Some(e.to_string()),
                    evidence: None,
                },
                Err(_) => InvocationResult {
                    invocation: invocation.name.clone(),
                    success: false,
                    output: Value::Null,
                    error: Some(format!(
                        "invocation '{}' timed out after {} seconds",
                        invocation.name,
                        self.invocation_timeout.as_secs()
                    )),
                    evidence: None,
                },
            };

            let hard_failure = !result.success;
            results.push(result);

            if hard_failure {
                log::warn!(
                    "Invocation {}::{} failed, short-circuiting plan",
                    plan.backend,
                    invocation.name
                );
                return ExecutionResult {
                    results,
                    success: false,
                };
            }
        }

        ExecutionResult {
            results,
            success: true,
        }
    }
}
