// SPDX-License-Identifier: MIT

//! Replanner
//!
//! Consulted only after an item's retry budget is exhausted. One
//! oracle call classifies the root cause and proposes a strategy; the
//! structural rules are then enforced programmatically, because the
//! oracle's opinion about the graph is not allowed to override the
//! graph itself:
//!
//! - abort is downgraded to skip when the failed item has no pending
//!   dependents and was not essential
//! - replanned items that verbatim-repeat the failed approach are
//!   dropped; a replan left with no items becomes an abort
//! - new items always depend on the failed item's own dependencies, so
//!   the validated insertion can never introduce a forward reference

use crate::engine::graph::{InsertItem, TodoGraph};
use crate::engine::types::{TodoId, TodoItem};
use crate::oracle::protocol::{ReplanStrategy, ReplanVerdict, RootCause};
use crate::oracle::{OracleClient, OracleRequest};
use crate::error::TelicError;
use serde_json::json;

/// The replanner's vetted decision, before insertion
#[derive(Debug, Clone)]
pub struct ReplanOutcome {
    pub strategy: ReplanStrategy,
    pub root_cause: Option<RootCause>,
    pub new_items: Vec<InsertItem>,
    pub reasoning: String,
}

pub struct Replanner<'a> {
    oracle: &'a OracleClient,
    default_max_attempts: u32,
}

impl<'a> Replanner<'a> {
    pub fn new(oracle: &'a OracleClient, default_max_attempts: u32) -> Self {
        Self {
            oracle,
            default_max_attempts,
        }
    }

    /// Decide how the workflow continues after `failed` exhausted its
    /// retry budget.
    pub async fn decide(
        &self,
        request: &str,
        graph: &TodoGraph,
        failed: &TodoItem,
    ) -> Result<ReplanOutcome, TelicError> {
        let has_dependents = graph.has_pending_dependents(&failed.id);
        let context = self.build_context(request, graph, failed, has_dependents);

        let task = format!(
            "An item of this workflow failed after exhausting its retries. \
             Classify the root cause, assess mission impact, and choose a strategy.\n\n\
             Original request: {}\nFailed item {}: {}\nSuccess criterion: {}\n\n\
             Respond with exactly one JSON object matching the ReplanVerdict contract:\n\
             {{\"strategy\": \"replan_and_continue\"|\"skip_and_continue\"|\"abort\",\n \
             \"root_cause\": \"approach_wrong\"|\"environment_unavailable\"|\"resource_missing\"|\"transient\",\n \
             \"essential\": true|false,\n \
             \"new_items\": [{{\"action\": \"...\", \"success_criterion\": \"...\"}}],\n \
             \"reasoning\": \"...\"}}\n\n\
             Rules:\n\
             - replan_and_continue requires new_items pursuing a genuinely different tactic, \
             never a repeat of the failed approach\n\
             - skip_and_continue only if the goal is attainable without this item\n\
             - abort only if the item is essential and no alternative tactic exists",
            request, failed.id, failed.action, failed.success_criterion
        );

        let verdict: ReplanVerdict = self
            .oracle
            .ask(&OracleRequest::new(task, context))
            .await
            .map_err(|e| {
                // A replanner that cannot decide leaves only one safe
                // exit for the workflow.
                TelicError::Aborted(format!(
                    "replanning failed for item {}: {}",
                    failed.id, e
                ))
            })?;

        Ok(self.vet(verdict, failed, has_dependents))
    }

    /// Enforce the structural rules on the oracle's verdict
    fn vet(&self, verdict: ReplanVerdict, failed: &TodoItem, has_dependents: bool) -> ReplanOutcome {
        let essential = verdict.essential.unwrap_or(has_dependents) || has_dependents;

        let new_items: Vec<InsertItem> = verdict
            .new_items
            .into_iter()
            .filter(|draft| {
                let repeat = normalized(&draft.action) == normalized(&failed.action);
                if repeat {
                    log::warn!(
                        "Dropping verbatim repeat of failed approach for item {}: '{}'",
                        failed.id,
                        draft.action
                    );
                }
                !repeat
            })
            .map(|draft| InsertItem {
                action: draft.action,
                success_criterion: draft.success_criterion,
                // Replacements inherit the failed item's dependencies;
                // chaining between replacements happens at insertion
                // where their final ids exist.
                dependencies: failed.dependencies.clone(),
                max_attempts: self.default_max_attempts,
            })
            .collect();

        let strategy = match verdict.strategy {
            ReplanStrategy::Abort if !essential => {
                log::info!(
                    "Downgrading abort to skip for item {}: no pending dependents and not essential",
                    failed.id
                );
                ReplanStrategy::SkipAndContinue
            }
            ReplanStrategy::ReplanAndContinue if new_items.is_empty() => {
                if essential {
                    log::warn!(
                        "Replan for item {} produced no usable alternative, aborting",
                        failed.id
                    );
                    ReplanStrategy::Abort
                } else {
                    ReplanStrategy::SkipAndContinue
                }
            }
            ReplanStrategy::SkipAndContinue if essential => {
                // Skipping an item the rest of the graph needs would
                // just move the failure downstream.
                if new_items.is_empty() {
                    log::warn!(
                        "Item {} has pending dependents or is essential, cannot skip; aborting",
                        failed.id
                    );
                    ReplanStrategy::Abort
                } else {
                    ReplanStrategy::ReplanAndContinue
                }
            }
            other => other,
        };

        let new_items = if strategy == ReplanStrategy::ReplanAndContinue {
            new_items
        } else {
            Vec::new()
        };

        ReplanOutcome {
            strategy,
            root_cause: verdict.root_cause,
            new_items,
            reasoning: verdict.reasoning,
        }
    }

    fn build_context(
        &self,
        request: &str,
        graph: &TodoGraph,
        failed: &TodoItem,
        has_dependents: bool,
    ) -> serde_json::Value {
        let completed: Vec<serde_json::Value> = graph
            .items()
            .iter()
            .filter(|item| item.status.satisfies_dependents())
            .map(|item| json!({"id": item.id, "action": item.action}))
            .collect();

        let remaining: Vec<serde_json::Value> = graph
            .items()
            .iter()
            .filter(|item| !item.status.is_terminal() && item.id != failed.id)
            .map(|item| json!({"id": item.id, "action": item.action, "dependencies": item.dependencies}))
            .collect();

        json!({
            "request": request,
            "failed_item": {
                "id": failed.id,
                "action": failed.action,
                "success_criterion": failed.success_criterion,
                "attempts": failed.attempts,
                "outcome_reason": failed.outcome_reason,
                "execution": failed.execution,
                "verification": failed.verification,
            },
            "has_pending_dependents": has_dependents,
            "completed_items": completed,
            "remaining_items": remaining,
        })
    }
}

/// Chain replacements after the first so they run as one sequence, and
/// return the chained drafts ready for [TodoGraph::insert_after].
///
/// The ids of later replacements do not exist until insertion time, so
/// the coordinator calls this once ids are assigned.
pub fn chain_dependencies(inserted: &[TodoId], graph: &mut TodoGraph) {
    for pair in inserted.windows(2) {
        let previous = pair[0].clone();
        if let Some(item) = graph.get_mut(&pair[1]) {
            item.dependencies.push(previous);
        }
    }
}

fn normalized(action: &str) -> String {
    action.trim().to_lowercase()
}
