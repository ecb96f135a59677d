// SPDX-License-Identifier: MIT

//! Engine module - the orchestration core
//!
//! One [Engine] holds the oracle client, the backend registry and the
//! configuration; each call to [Engine::run] creates a fresh
//! coordinator owning a fresh graph, so concurrent runs never share
//! workflow state.

pub mod action;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod graph;
pub mod planner;
pub mod replan;
pub mod selector;
pub mod summary;
pub mod types;
pub mod verify;

use crate::backend::registry::BackendRegistry;
use crate::engine::config::EngineConfig;
use crate::engine::coordinator::Coordinator;
use crate::engine::types::{
    ReplanDecision, TodoId, VerificationPath, WorkflowReport,
};
use crate::oracle::{Oracle, OracleClient};
use crate::error::TelicError;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Progress events emitted while a workflow runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    PlanCreated {
        run_id: String,
        items: Vec<(TodoId, String)>,
    },
    ItemStarted {
        id: TodoId,
        action: String,
        attempt: u32,
    },
    BackendsSelected {
        id: TodoId,
        backends: Vec<String>,
        confidence: u8,
        defaulted: bool,
    },
    InvocationsPlanned {
        id: TodoId,
        backend: String,
        count: usize,
        replan_candidate: bool,
    },
    ItemExecuted {
        id: TodoId,
        success: bool,
    },
    ItemVerified {
        id: TodoId,
        verified: bool,
        confidence: u8,
        path: VerificationPath,
    },
    ItemCompleted {
        id: TodoId,
    },
    ItemRetrying {
        id: TodoId,
        attempt: u32,
        max_attempts: u32,
    },
    ItemFailed {
        id: TodoId,
        reason: String,
    },
    ReplanApplied {
        decision: ReplanDecision,
    },
    RunFinished {
        report: Box<WorkflowReport>,
    },
}

/// The engine facade: everything needed to turn a request into a report
pub struct Engine {
    oracle: OracleClient,
    registry: BackendRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(oracle: Arc<dyn Oracle>, registry: BackendRegistry, config: EngineConfig) -> Self {
        let oracle = OracleClient::new(oracle, config.oracle_timeout());
        Self {
            oracle,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a request to completion without cancellation or events
    pub async fn run(&self, request: &str, context: &Value) -> Result<WorkflowReport, TelicError> {
        self.run_with(request, context, CancellationToken::new(), None)
            .await
    }

    /// Run a request with an external cancel signal and an optional
    /// event stream
    pub async fn run_with(
        &self,
        request: &str,
        context: &Value,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<WorkflowEvent>>,
    ) -> Result<WorkflowReport, TelicError> {
        let mut coordinator =
            Coordinator::new(&self.oracle, &self.registry, &self.config, cancel, events);
        coordinator.run(request, context).await
    }
}
