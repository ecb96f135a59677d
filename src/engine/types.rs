// SPDX-License-Identifier: MIT

//! Core engine data model
//!
//! [TodoId] is the ordering backbone of the whole engine: a
//! hierarchical id implemented as a comparable integer tuple, so that
//! `1.2 < 1.10 < 2` holds without the precision traps of decimal
//! notation. Every dependency invariant reduces to tuple comparison.

use crate::backend::EvidenceRef;
use crate::oracle::protocol::{ReplanStrategy, RootCause};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Hierarchical item id: `1`, `1.2`, `1.2.1`, ...
///
/// Ordered lexicographically over the integer components, which makes
/// the dependency invariant (`d < item`) and display nesting agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TodoId(Vec<u32>);

impl TodoId {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn root(index: u32) -> Self {
        Self(vec![index])
    }

    /// Child id under this one: `2`.child(1) == `2.1`
    pub fn child(&self, index: u32) -> Self {
        let mut components = self.0.clone();
        components.push(index);
        Self(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True if `self` is a direct child of `other`
    pub fn is_child_of(&self, other: &TodoId) -> bool {
        self.0.len() == other.0.len() + 1 && self.0.starts_with(&other.0)
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", rendered.join("."))
    }
}

impl FromStr for TodoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty id".to_string());
        }
        let components: Result<Vec<u32>, _> = s.split('.').map(|part| part.parse::<u32>()).collect();
        match components {
            Ok(c) if !c.is_empty() => Ok(Self(c)),
            _ => Err(format!("'{}' is not a dotted integer id", s)),
        }
    }
}

impl Serialize for TodoId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TodoId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Item lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Soft-deleted: either deliberately skipped or superseded by
    /// replanned items. Counts as satisfied for dependents.
    Skipped,
}

impl TodoStatus {
    /// True when the item will never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// True when dependents of this item may proceed
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// One concrete invocation against a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub name: String,
    pub parameters: Value,
}

/// A validated, catalog-checked invocation sequence for one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationPlan {
    pub backend: String,
    pub invocations: Vec<Invocation>,
    /// Set when the oracle proposed more work than fits one plan and
    /// the accepted prefix probably needs replanning to finish.
    #[serde(default)]
    pub replan_candidate: bool,
}

/// Result of one dispatched invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub invocation: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub evidence: Option<EvidenceRef>,
}

/// Result of dispatching a whole invocation plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub results: Vec<InvocationResult>,
    pub success: bool,
}

impl ExecutionResult {
    /// All evidence collected, including from the partial prefix of a
    /// failed run.
    pub fn evidence(&self) -> Vec<&EvidenceRef> {
        self.results
            .iter()
            .filter_map(|r| r.evidence.as_ref())
            .collect()
    }

    /// First error message, if any invocation failed
    pub fn first_error(&self) -> Option<&str> {
        self.results
            .iter()
            .find_map(|r| r.error.as_deref())
    }
}

/// Which evidence path verified (or rejected) an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPath {
    Data,
    Visual,
    /// Data evidence was inconclusive, visual settled it
    HybridFallback,
}

/// Outcome of verifying one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// 0..=100
    pub confidence: u8,
    pub reason: String,
    pub evidence: Value,
    pub path: VerificationPath,
    pub repair_suggestion: Option<String>,
}

/// Backend selection recorded on an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedBackends {
    pub names: Vec<String>,
    pub confidence: u8,
    /// True when low confidence forced the deterministic default
    #[serde(default)]
    pub defaulted: bool,
}

/// The atomic unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoId,
    pub action: String,
    pub success_criterion: String,
    pub dependencies: Vec<TodoId>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: TodoStatus,
    pub backends: Option<SelectedBackends>,
    pub plan: Option<InvocationPlan>,
    pub execution: Option<ExecutionResult>,
    pub verification: Option<VerificationResult>,
    /// Why the item failed or was skipped, for the final report
    pub outcome_reason: Option<String>,
}

impl TodoItem {
    pub fn new(
        id: TodoId,
        action: impl Into<String>,
        success_criterion: impl Into<String>,
        dependencies: Vec<TodoId>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            action: action.into(),
            success_criterion: success_criterion.into(),
            dependencies,
            attempts: 0,
            max_attempts,
            status: TodoStatus::Pending,
            backends: None,
            plan: None,
            execution: None,
            verification: None,
            outcome_reason: None,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Applied replanning decision, recorded in the trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanDecision {
    pub strategy: ReplanStrategy,
    pub root_cause: Option<RootCause>,
    pub failed_item: TodoId,
    /// Ids of the newly inserted items (empty unless replanning)
    pub inserted: Vec<TodoId>,
    /// Where execution resumes: first new item (replan), next existing
    /// item (skip), or nothing (abort)
    pub resume_at: Option<TodoId>,
    pub reasoning: String,
}

/// How a workflow run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkflowOutcome {
    /// Every item completed or was deliberately skipped
    Completed,
    /// The replanner decided the goal is unreachable
    Aborted { reason: String },
    /// Remaining items can never run
    Deadlocked { blocked: Vec<String> },
    /// External cancellation between items
    Cancelled,
}

/// Per-item line in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub id: TodoId,
    pub action: String,
    pub status: TodoStatus,
    pub attempts: u32,
    pub reason: Option<String>,
}

/// The structured final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub run_id: String,
    pub request: String,
    pub outcome: WorkflowOutcome,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    /// completed / total, in percent
    pub success_rate: f64,
    pub items: Vec<ItemOutcome>,
    pub replans: Vec<ReplanDecision>,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
