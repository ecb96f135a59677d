// SPDX-License-Identifier: MIT

//! Workflow Coordinator
//!
//! Drives one request across the whole graph: pick the next ready
//! item, run selector → action planner → dispatcher → verifier, retry
//! in place within the item's budget, escalate to the replanner on
//! exhaustion, and terminate on completion, abort, deadlock or
//! cancellation. The graph is owned by this coordinator for the whole
//! run; every mutation happens inside this loop.

use crate::backend::registry::BackendRegistry;
use crate::engine::action::ActionPlanner;
use crate::engine::config::EngineConfig;
use crate::engine::dispatch::Dispatcher;
use crate::engine::graph::TodoGraph;
use crate::engine::planner::TaskPlanner;
use crate::engine::replan::{chain_dependencies, Replanner};
use crate::engine::selector::BackendSelector;
use crate::engine::summary::summarize;
use crate::engine::types::{
    ReplanDecision, TodoId, TodoStatus, WorkflowOutcome, WorkflowReport,
};
use crate::engine::verify::Verifier;
use crate::engine::WorkflowEvent;
use crate::oracle::protocol::ReplanStrategy;
use crate::oracle::OracleClient;
use crate::error::TelicError;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the per-item step decided about the run
enum StepOutcome {
    Continue,
    Terminal(WorkflowOutcome),
}

pub struct Coordinator<'a> {
    oracle: &'a OracleClient,
    registry: &'a BackendRegistry,
    config: &'a EngineConfig,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<WorkflowEvent>>,
    replans: Vec<ReplanDecision>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        oracle: &'a OracleClient,
        registry: &'a BackendRegistry,
        config: &'a EngineConfig,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<WorkflowEvent>>,
    ) -> Self {
        Self {
            oracle,
            registry,
            config,
            cancel,
            events,
            replans: Vec::new(),
        }
    }

    /// Run one request to a terminal state and return the report.
    ///
    /// Terminal failures (abort, deadlock, cancellation) are carried
    /// in the report's outcome so the summary is never lost; only a
    /// plan-time failure, where no graph exists to summarize, surfaces
    /// as an error.
    pub async fn run(
        &mut self,
        request: &str,
        context: &Value,
    ) -> Result<WorkflowReport, TelicError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        log::info!("Run {} started: {}", run_id, request);

        let planner = TaskPlanner::new(self.oracle, self.config.default_max_attempts);
        let mut graph = planner.plan(request, context).await?;

        self.emit(WorkflowEvent::PlanCreated {
            run_id: run_id.clone(),
            items: graph
                .items()
                .iter()
                .map(|item| (item.id.clone(), item.action.clone()))
                .collect(),
        })
        .await;

        // Safety valve against a cycle of replans that never converges
        let max_iterations = graph.len() * 25 + 50;
        let mut iteration = 0;

        let outcome = loop {
            iteration += 1;
            if iteration > max_iterations {
                log::error!("Run {} exceeded iteration guard", run_id);
                break WorkflowOutcome::Aborted {
                    reason: "iteration guard exceeded; the workflow was not converging".to_string(),
                };
            }

            // Cancellation is only honored between items, never
            // mid-invocation.
            if self.cancel.is_cancelled() {
                log::warn!("Run {} cancelled", run_id);
                break WorkflowOutcome::Cancelled;
            }

            let next_id = match graph.next_ready() {
                Some(item) => item.id.clone(),
                None => {
                    if graph.pending_count() == 0 {
                        break WorkflowOutcome::Completed;
                    }
                    let blocked: Vec<String> = graph
                        .blocked_items()
                        .iter()
                        .map(|item| item.id.to_string())
                        .collect();
                    log::error!("Run {} deadlocked; blocked items: {:?}", run_id, blocked);
                    break WorkflowOutcome::Deadlocked { blocked };
                }
            };

            match self.process_item(request, &mut graph, &next_id).await? {
                StepOutcome::Continue => {}
                StepOutcome::Terminal(outcome) => break outcome,
            }
        };

        let report = summarize(
            run_id,
            request,
            &graph,
            outcome,
            std::mem::take(&mut self.replans),
            started_at,
            Utc::now(),
        );

        self.emit(WorkflowEvent::RunFinished {
            report: Box::new(report.clone()),
        })
        .await;

        Ok(report)
    }

    /// One attempt at one item: select → plan → execute → verify
    async fn process_item(
        &mut self,
        request: &str,
        graph: &mut TodoGraph,
        id: &TodoId,
    ) -> Result<StepOutcome, TelicError> {
        let (action, attempt) = {
            let item = graph.get_mut(id).expect("ready item exists");
            item.status = TodoStatus::InProgress;
            item.attempts += 1;
            (item.action.clone(), item.attempts)
        };

        self.emit(WorkflowEvent::ItemStarted {
            id: id.clone(),
            action,
            attempt,
        })
        .await;

        // Backend selection is sticky across retries of the same item
        if graph.get(id).expect("item exists").backends.is_none() {
            let selector =
                BackendSelector::new(self.oracle, self.registry, self.config.selector_confidence_threshold);
            let selected = selector.select(graph.get(id).expect("item exists")).await?;

            self.emit(WorkflowEvent::BackendsSelected {
                id: id.clone(),
                backends: selected.names.clone(),
                confidence: selected.confidence,
                defaulted: selected.defaulted,
            })
            .await;

            graph.get_mut(id).expect("item exists").backends = Some(selected);
        }

        // The invocation plan is also sticky: transient failures retry
        // the same tactic, a new tactic comes from the replanner.
        if graph.get(id).expect("item exists").plan.is_none() {
            match self.plan_invocations(graph, id).await {
                Ok(plan) => {
                    self.emit(WorkflowEvent::InvocationsPlanned {
                        id: id.clone(),
                        backend: plan.backend.clone(),
                        count: plan.invocations.len(),
                        replan_candidate: plan.replan_candidate,
                    })
                    .await;
                    graph.get_mut(id).expect("item exists").plan = Some(plan);
                }
                Err(e) => {
                    return self
                        .handle_failure(request, graph, id, format!("planning failed: {}", e))
                        .await;
                }
            }
        }

        let plan = graph.get(id).expect("item exists").plan.clone().expect("plan just set");
        let dispatcher = Dispatcher::new(self.registry, self.config.invocation_timeout());
        let execution = dispatcher.execute(&plan).await;

        self.emit(WorkflowEvent::ItemExecuted {
            id: id.clone(),
            success: execution.success,
        })
        .await;

        if !execution.success {
            let reason = execution
                .first_error()
                .unwrap_or("execution failed")
                .to_string();
            graph.get_mut(id).expect("item exists").execution = Some(execution);
            return self.handle_failure(request, graph, id, reason).await;
        }
        graph.get_mut(id).expect("item exists").execution = Some(execution.clone());

        let verifier = Verifier::new(self.oracle, self.registry, self.config);
        let verification = match verifier.verify(graph.get(id).expect("item exists"), &execution).await {
            Ok(verification) => verification,
            Err(e) => {
                return self
                    .handle_failure(request, graph, id, format!("verification failed: {}", e))
                    .await;
            }
        };

        self.emit(WorkflowEvent::ItemVerified {
            id: id.clone(),
            verified: verification.verified,
            confidence: verification.confidence,
            path: verification.path,
        })
        .await;

        let verified = verification.verified;
        let reason = verification.reason.clone();
        graph.get_mut(id).expect("item exists").verification = Some(verification);

        if verified {
            let item = graph.get_mut(id).expect("item exists");
            item.status = TodoStatus::Completed;
            item.outcome_reason = None;
            self.emit(WorkflowEvent::ItemCompleted { id: id.clone() }).await;
            return Ok(StepOutcome::Continue);
        }

        self.handle_failure(request, graph, id, format!("criterion not met: {}", reason))
            .await
    }

    /// Try the selected backends in order until one yields a valid plan
    async fn plan_invocations(
        &self,
        graph: &TodoGraph,
        id: &TodoId,
    ) -> Result<crate::engine::types::InvocationPlan, TelicError> {
        let item = graph.get(id).expect("item exists");
        let names = item
            .backends
            .as_ref()
            .map(|selected| selected.names.clone())
            .unwrap_or_default();

        let action_planner = ActionPlanner::new(self.oracle);
        let mut last_error: Option<TelicError> = None;

        for name in &names {
            let backend = self
                .registry
                .get(name)
                .await
                .ok_or_else(|| TelicError::BackendNotFound { name: name.clone() })?;

            match action_planner.plan(item, backend.as_ref()).await {
                Ok(plan) => return Ok(plan),
                Err(e) => {
                    log::warn!("Invocation planning on '{}' failed for item {}: {}", name, id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TelicError::config("no backends selected")))
    }

    /// Retry in place within the budget; consult the replanner once it
    /// is exhausted.
    async fn handle_failure(
        &mut self,
        request: &str,
        graph: &mut TodoGraph,
        id: &TodoId,
        reason: String,
    ) -> Result<StepOutcome, TelicError> {
        log::warn!("Item {} attempt failed: {}", id, reason);

        let exhausted = {
            let item = graph.get_mut(id).expect("item exists");
            item.outcome_reason = Some(reason.clone());
            item.budget_exhausted()
        };

        if !exhausted {
            let item = graph.get_mut(id).expect("item exists");
            item.status = TodoStatus::Pending;
            self.emit(WorkflowEvent::ItemRetrying {
                id: id.clone(),
                attempt: item.attempts,
                max_attempts: item.max_attempts,
            })
            .await;
            return Ok(StepOutcome::Continue);
        }

        graph.get_mut(id).expect("item exists").status = TodoStatus::Failed;
        self.emit(WorkflowEvent::ItemFailed {
            id: id.clone(),
            reason: reason.clone(),
        })
        .await;

        let replanner = Replanner::new(self.oracle, self.config.default_max_attempts);
        let outcome = {
            let failed = graph.get(id).expect("item exists");
            match replanner.decide(request, graph, failed).await {
                Ok(outcome) => outcome,
                Err(TelicError::Aborted(abort_reason)) => {
                    return Ok(StepOutcome::Terminal(WorkflowOutcome::Aborted {
                        reason: abort_reason,
                    }));
                }
                Err(e) => return Err(e),
            }
        };

        let decision = match outcome.strategy {
            ReplanStrategy::Abort => {
                let decision = ReplanDecision {
                    strategy: ReplanStrategy::Abort,
                    root_cause: outcome.root_cause,
                    failed_item: id.clone(),
                    inserted: vec![],
                    resume_at: None,
                    reasoning: outcome.reasoning.clone(),
                };
                self.replans.push(decision);
                return Ok(StepOutcome::Terminal(WorkflowOutcome::Aborted {
                    reason: outcome.reasoning,
                }));
            }
            ReplanStrategy::SkipAndContinue => {
                let item = graph.get_mut(id).expect("item exists");
                item.status = TodoStatus::Skipped;
                item.outcome_reason = Some(format!(
                    "skipped after failure ({}); last failure: {}",
                    outcome.reasoning, reason
                ));
                ReplanDecision {
                    strategy: ReplanStrategy::SkipAndContinue,
                    root_cause: outcome.root_cause,
                    failed_item: id.clone(),
                    inserted: vec![],
                    resume_at: graph.next_ready().map(|item| item.id.clone()),
                    reasoning: outcome.reasoning,
                }
            }
            ReplanStrategy::ReplanAndContinue => {
                let inserted = match graph.insert_after(id, outcome.new_items) {
                    Ok(inserted) => inserted,
                    Err(e) => {
                        return Ok(StepOutcome::Terminal(WorkflowOutcome::Aborted {
                            reason: format!("replanning produced an invalid graph: {}", e),
                        }));
                    }
                };
                chain_dependencies(&inserted, graph);

                // The failed item is superseded: soft-delete it so its
                // dependents wait on the replacements (which sort
                // immediately after it) instead of deadlocking.
                let item = graph.get_mut(id).expect("item exists");
                item.status = TodoStatus::Skipped;
                item.outcome_reason = Some(format!(
                    "failed and replaced by [{}]; last failure: {}",
                    inserted
                        .iter()
                        .map(|inserted_id| inserted_id.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    reason
                ));

                ReplanDecision {
                    strategy: ReplanStrategy::ReplanAndContinue,
                    root_cause: outcome.root_cause,
                    failed_item: id.clone(),
                    resume_at: inserted.first().cloned(),
                    inserted,
                    reasoning: outcome.reasoning,
                }
            }
        };

        self.emit(WorkflowEvent::ReplanApplied {
            decision: decision.clone(),
        })
        .await;
        self.replans.push(decision);

        Ok(StepOutcome::Continue)
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
