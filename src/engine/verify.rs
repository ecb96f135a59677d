// SPDX-License-Identifier: MIT

//! Verifier
//!
//! Two-path state machine confirming that an item's success criterion
//! was observably met. The data path replays read-only probes against
//! the artifacts execution claims to have produced and combines the
//! programmatic comparison with one oracle interpretation; the visual
//! path captures a snapshot and asks the oracle to compare it against
//! the criterion. Hybrid routing tries data first and falls back to
//! visual only when data evidence is inconclusive.
//!
//! Terminal states are `Verified` (confidence at or above the gate)
//! and `Rejected`, each carrying reason and evidence for the
//! replanner.

use crate::backend::registry::BackendRegistry;
use crate::backend::{Backend, EvidenceKind};
use crate::engine::config::EngineConfig;
use crate::engine::types::{
    ExecutionResult, TodoItem, VerificationPath, VerificationResult,
};
use crate::oracle::protocol::VerificationVerdict;
use crate::oracle::{OracleClient, OracleRequest};
use crate::error::TelicError;
use serde_json::{json, Value};
use std::sync::Arc;

/// Action/criterion wording that suggests only a visual snapshot can
/// conclusively demonstrate success.
const VISUAL_HINTS: &[&str] = &[
    "display", "visible", "shown", "appears", "on screen", "window", "render", "dialog",
];

/// Cap on read-only probes per verification
const MAX_CHECKS: usize = 3;

/// One derived read-only probe
struct DataCheck {
    backend: Arc<dyn Backend>,
    invocation: String,
    parameters: Value,
}

enum VerifyState {
    DataPath { allow_visual_fallback: bool },
    VisualPath { fallback: bool },
    Done(VerificationResult),
}

pub struct Verifier<'a> {
    oracle: &'a OracleClient,
    registry: &'a BackendRegistry,
    config: &'a EngineConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(
        oracle: &'a OracleClient,
        registry: &'a BackendRegistry,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            oracle,
            registry,
            config,
        }
    }

    /// Verify one executed item
    pub async fn verify(
        &self,
        item: &TodoItem,
        execution: &ExecutionResult,
    ) -> Result<VerificationResult, TelicError> {
        let mut state = self.route(item).await;

        loop {
            state = match state {
                VerifyState::DataPath {
                    allow_visual_fallback,
                } => {
                    self.run_data_path(item, execution, allow_visual_fallback)
                        .await?
                }
                VerifyState::VisualPath { fallback } => {
                    self.run_visual_path(item, fallback).await?
                }
                VerifyState::Done(result) => return Ok(result),
            };
        }
    }

    /// Eligibility routing: estimate which evidence path can
    /// conclusively demonstrate success.
    async fn route(&self, item: &TodoItem) -> VerifyState {
        let wording = format!("{} {}", item.action, item.success_criterion).to_lowercase();
        let visually_phrased = VISUAL_HINTS.iter().any(|hint| wording.contains(hint));
        let snapshot_available = self.registry.snapshot_capable().await.is_some();

        if visually_phrased && snapshot_available {
            log::info!("Item {} routed to the visual path", item.id);
            VerifyState::VisualPath { fallback: false }
        } else {
            VerifyState::DataPath {
                allow_visual_fallback: snapshot_available,
            }
        }
    }

    async fn run_data_path(
        &self,
        item: &TodoItem,
        execution: &ExecutionResult,
        allow_visual_fallback: bool,
    ) -> Result<VerifyState, TelicError> {
        let checks = self.derive_checks(item, execution).await;
        let mut check_outputs = Vec::with_capacity(checks.len());

        for check in &checks {
            log::info!(
                "Verification probe {}::{} {:?}",
                check.backend.name(),
                check.invocation,
                check.parameters
            );
            match check
                .backend
                .invoke(&check.invocation, check.parameters.clone())
                .await
            {
                Ok(outcome) => {
                    // Programmatic comparison: an artifact execution
                    // claimed to produce but which does not exist is a
                    // conclusive rejection, no interpretation needed.
                    if outcome.output.get("exists") == Some(&Value::Bool(false)) {
                        return Ok(VerifyState::Done(VerificationResult {
                            verified: false,
                            confidence: 95,
                            reason: format!(
                                "expected artifact missing: {}",
                                outcome.output.get("path").and_then(|p| p.as_str()).unwrap_or("?")
                            ),
                            evidence: outcome.output,
                            path: VerificationPath::Data,
                            repair_suggestion: None,
                        }));
                    }
                    check_outputs.push(json!({
                        "invocation": check.invocation,
                        "success": outcome.success,
                        "output": outcome.output,
                        "error": outcome.error,
                    }));
                }
                Err(e) => check_outputs.push(json!({
                    "invocation": check.invocation,
                    "success": false,
                    "error": e.to_string(),
                })),
            }
        }

        let execution_outputs: Vec<Value> = execution
            .results
            .iter()
            .map(|r| {
                json!({
                    "invocation": r.invocation,
                    "success": r.success,
                    "output": r.output,
                    "error": r.error,
                })
            })
            .collect();

        let task = format!(
            "Judge whether this success criterion is met by the data evidence.\n\n\
             Action taken: {}\nSuccess criterion: {}\n\n\
             Respond with exactly one JSON object matching the VerificationVerdict contract:\n\
             {{\"verified\": true|false, \"confidence\": 0-100, \"reason\": \"...\", \
             \"evidence\": ..., \"repair_suggestion\": \"...\"|null}}",
            item.action, item.success_criterion
        );

        let verdict: VerificationVerdict = self
            .oracle
            .ask(&OracleRequest::new(
                task,
                json!({
                    "execution_results": execution_outputs,
                    "read_only_checks": check_outputs,
                }),
            ))
            .await
            .map_err(TelicError::Oracle)?;

        let confidence = verdict.confidence.min(100);

        if confidence < self.config.inconclusive_threshold && allow_visual_fallback {
            log::info!(
                "Data evidence inconclusive for item {} (confidence {}), falling back to visual",
                item.id,
                confidence
            );
            return Ok(VerifyState::VisualPath { fallback: true });
        }

        Ok(VerifyState::Done(self.finish(
            verdict,
            json!({"checks": check_outputs}),
            VerificationPath::Data,
        )))
    }

    async fn run_visual_path(
        &self,
        item: &TodoItem,
        fallback: bool,
    ) -> Result<VerifyState, TelicError> {
        let path = if fallback {
            VerificationPath::HybridFallback
        } else {
            VerificationPath::Visual
        };

        let backend = match self.registry.snapshot_capable().await {
            Some(backend) => backend,
            None => {
                return Ok(VerifyState::Done(VerificationResult {
                    verified: false,
                    confidence: 0,
                    reason: "no snapshot-capable backend available for visual evidence".to_string(),
                    evidence: Value::Null,
                    path,
                    repair_suggestion: None,
                }))
            }
        };

        let snapshot = match backend.capture_snapshot(&item.action).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Ok(VerifyState::Done(VerificationResult {
                    verified: false,
                    confidence: 0,
                    reason: format!("snapshot capture failed: {}", e),
                    evidence: Value::Null,
                    path,
                    repair_suggestion: None,
                }))
            }
        };
        debug_assert_eq!(snapshot.kind, EvidenceKind::Snapshot);

        let task = format!(
            "Compare the referenced snapshot against this success criterion.\n\n\
             Success criterion: {}\n\n\
             Respond with exactly one JSON object matching the VerificationVerdict contract:\n\
             {{\"verified\": true|false, \"confidence\": 0-100, \"reason\": \"...\", \
             \"evidence\": ..., \"repair_suggestion\": \"...\"|null}}",
            item.success_criterion
        );

        let verdict: VerificationVerdict = self
            .oracle
            .ask(&OracleRequest::new(
                task,
                json!({
                    "snapshot_ref": snapshot,
                    "action": item.action,
                }),
            ))
            .await
            .map_err(TelicError::Oracle)?;

        Ok(VerifyState::Done(self.finish(
            verdict,
            json!({"snapshot": snapshot}),
            path,
        )))
    }

    /// Apply the confidence gate and assemble the terminal result
    fn finish(
        &self,
        verdict: VerificationVerdict,
        gathered_evidence: Value,
        path: VerificationPath,
    ) -> VerificationResult {
        let confidence = verdict.confidence.min(100);
        let verified = verdict.verified && confidence >= self.config.verification_threshold;

        let reason = if verdict.verified && !verified {
            format!(
                "{} (confidence {} below gate {})",
                verdict.reason, confidence, self.config.verification_threshold
            )
        } else {
            verdict.reason
        };

        VerificationResult {
            verified,
            confidence,
            reason,
            evidence: json!({
                "oracle": verdict.evidence,
                "gathered": gathered_evidence,
            }),
            path,
            repair_suggestion: verdict.repair_suggestion,
        }
    }

    /// Derive up to [MAX_CHECKS] read-only probes from the artifacts
    /// the execution produced. Backends selected for the item are
    /// preferred; any registered backend with a suitable read-only
    /// probe is a fallback.
    async fn derive_checks(&self, item: &TodoItem, execution: &ExecutionResult) -> Vec<DataCheck> {
        let mut artifact_paths: Vec<String> = execution
            .evidence()
            .iter()
            .filter(|evidence| evidence.kind == EvidenceKind::Artifact)
            .filter(|evidence| evidence.location.starts_with('/'))
            .map(|evidence| evidence.location.clone())
            .collect();
        artifact_paths.dedup();

        if artifact_paths.is_empty() {
            return Vec::new();
        }

        let probe_backend = match self.find_probe_backend(item).await {
            Some(backend) => backend,
            None => return Vec::new(),
        };

        let has_probe = |name: &str| {
            probe_backend
                .catalog()
                .iter()
                .any(|spec| spec.read_only && spec.name == name)
        };

        let mut checks = Vec::new();
        for path in &artifact_paths {
            if checks.len() >= MAX_CHECKS {
                break;
            }
            if has_probe("stat_file") {
                checks.push(DataCheck {
                    backend: probe_backend.clone(),
                    invocation: "stat_file".to_string(),
                    parameters: json!({"path": path}),
                });
            }
            if checks.len() < MAX_CHECKS && has_probe("read_file") {
                checks.push(DataCheck {
                    backend: probe_backend.clone(),
                    invocation: "read_file".to_string(),
                    parameters: json!({"path": path}),
                });
            }
        }
        checks
    }

    async fn find_probe_backend(&self, item: &TodoItem) -> Option<Arc<dyn Backend>> {
        let mut candidates: Vec<String> = item
            .backends
            .as_ref()
            .map(|selected| selected.names.clone())
            .unwrap_or_default();
        for name in self.registry.names().await {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        for name in candidates {
            if let Some(backend) = self.registry.get(&name).await {
                if backend.catalog().iter().any(|spec| {
                    spec.read_only
                        && spec
                            .parameters
                            .get("properties")
                            .and_then(|p| p.get("path"))
                            .is_some()
                }) {
                    return Some(backend);
                }
            }
        }
        None
    }
}
