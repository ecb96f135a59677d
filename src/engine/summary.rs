// SPDX-License-Identifier: MIT

//! Summarizer
//!
//! Pure reducer over the full per-item trace. Never re-invokes a
//! backend or the oracle; it always runs, whatever the outcome, and it
//! always lists every failed and skipped item with its reason.

use crate::engine::graph::TodoGraph;
use crate::engine::types::{
    ItemOutcome, ReplanDecision, TodoStatus, WorkflowOutcome, WorkflowReport,
};
use chrono::{DateTime, Utc};

/// Reduce the final graph state into the structured report
#[allow(clippy::too_many_arguments)]
pub fn summarize(
    run_id: String,
    request: &str,
    graph: &TodoGraph,
    outcome: WorkflowOutcome,
    replans: Vec<ReplanDecision>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> WorkflowReport {
    let items: Vec<ItemOutcome> = graph
        .items()
        .iter()
        .map(|item| ItemOutcome {
            id: item.id.clone(),
            action: item.action.clone(),
            status: item.status,
            attempts: item.attempts,
            reason: item.outcome_reason.clone(),
        })
        .collect();

    let total = items.len();
    let completed = count(&items, TodoStatus::Completed);
    let failed = count(&items, TodoStatus::Failed);
    let skipped = count(&items, TodoStatus::Skipped);

    let success_rate = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };

    let summary = render_summary(request, &outcome, &items, completed, total, success_rate);

    WorkflowReport {
        run_id,
        request: request.to_string(),
        outcome,
        completed,
        failed,
        skipped,
        total,
        success_rate,
        items,
        replans,
        summary,
        started_at,
        finished_at,
    }
}

fn count(items: &[ItemOutcome], status: TodoStatus) -> usize {
    items.iter().filter(|item| item.status == status).count()
}

fn render_summary(
    request: &str,
    outcome: &WorkflowOutcome,
    items: &[ItemOutcome],
    completed: usize,
    total: usize,
    success_rate: f64,
) -> String {
    let headline = match outcome {
        WorkflowOutcome::Completed => format!(
            "Completed {}/{} items ({:.0}% success) for: {}",
            completed, total, success_rate, request
        ),
        WorkflowOutcome::Aborted { reason } => format!(
            "Aborted after {}/{} items ({:.0}% success): {}",
            completed, total, success_rate, reason
        ),
        WorkflowOutcome::Deadlocked { blocked } => format!(
            "Deadlocked after {}/{} items ({:.0}% success); blocked items: {}",
            completed,
            total,
            success_rate,
            blocked.join(", ")
        ),
        WorkflowOutcome::Cancelled => format!(
            "Cancelled after {}/{} items ({:.0}% success)",
            completed, total, success_rate
        ),
    };

    let mut lines = vec![headline];
    for item in items {
        match item.status {
            TodoStatus::Failed | TodoStatus::Skipped => lines.push(format!(
                "- [{}] {} ({}): {}",
                item.id,
                item.action,
                item.status,
                item.reason.as_deref().unwrap_or("no reason recorded")
            )),
            TodoStatus::Completed => {
                lines.push(format!("- [{}] {} (completed)", item.id, item.action))
            }
            _ => lines.push(format!(
                "- [{}] {} ({})",
                item.id, item.action, item.status
            )),
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{TodoId, TodoItem};

    fn finished_graph(statuses: &[(&str, TodoStatus, Option<&str>)]) -> TodoGraph {
        let items = statuses
            .iter()
            .enumerate()
            .map(|(index, (id, status, reason))| {
                let mut item = TodoItem::new(
                    id.parse().unwrap(),
                    format!("action {}", index + 1),
                    "criterion".to_string(),
                    vec![],
                    2,
                );
                item.status = *status;
                item.outcome_reason = reason.map(String::from);
                item
            })
            .collect();
        TodoGraph::new(items).unwrap()
    }

    fn report(graph: &TodoGraph, outcome: WorkflowOutcome) -> WorkflowReport {
        let now = Utc::now();
        summarize(
            "run-1".to_string(),
            "do the thing",
            graph,
            outcome,
            vec![],
            now,
            now,
        )
    }

    #[test]
    fn test_full_success_counts() {
        let graph = finished_graph(&[
            ("1", TodoStatus::Completed, None),
            ("2", TodoStatus::Completed, None),
        ]);
        let report = report(&graph, WorkflowOutcome::Completed);

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total, 2);
        assert!((report.success_rate - 100.0).abs() < f64::EPSILON);
        assert!(report.summary.contains("2/2"));
        assert!(report.summary.contains("100% success"));
    }

    #[test]
    fn test_skipped_item_listed_with_reason() {
        let graph = finished_graph(&[
            ("1", TodoStatus::Completed, None),
            ("2", TodoStatus::Completed, None),
            ("3", TodoStatus::Skipped, Some("decorative screenshot, not essential")),
        ]);
        let report = report(&graph, WorkflowOutcome::Completed);

        assert_eq!(report.completed, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.summary.contains("decorative screenshot"));
        // 2 of 3 completed
        assert!((report.success_rate - 66.66).abs() < 1.0);
    }

    #[test]
    fn test_abort_reports_zero_success_with_reason() {
        let graph = finished_graph(&[
            ("1", TodoStatus::Failed, Some("application not installed")),
            ("2", TodoStatus::Pending, None),
        ]);
        let report = report(
            &graph,
            WorkflowOutcome::Aborted {
                reason: "environment unavailable: application not installed".to_string(),
            },
        );

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 1);
        assert!((report.success_rate - 0.0).abs() < f64::EPSILON);
        assert!(report.summary.contains("application not installed"));
    }

    #[test]
    fn test_every_failed_item_appears_in_summary() {
        let graph = finished_graph(&[
            ("1", TodoStatus::Failed, Some("first failure")),
            ("2", TodoStatus::Failed, Some("second failure")),
        ]);
        let report = report(
            &graph,
            WorkflowOutcome::Aborted {
                reason: "everything failed".to_string(),
            },
        );

        assert!(report.summary.contains("first failure"));
        assert!(report.summary.contains("second failure"));
    }

    #[test]
    fn test_cancelled_still_summarizes_partial_trace() {
        let graph = finished_graph(&[
            ("1", TodoStatus::Completed, None),
            ("2", TodoStatus::Pending, None),
        ]);
        let report = report(&graph, WorkflowOutcome::Cancelled);

        assert_eq!(report.completed, 1);
        assert!(report.summary.contains("Cancelled after 1/2"));
    }
}
