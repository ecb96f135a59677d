// SPDX-License-Identifier: MIT

//! Planning Oracle Adapter
//!
//! Turns one request into an initial [TodoGraph]. The oracle's draft is
//! validated field by field before anything downstream sees it: this
//! adapter never infers a missing field, and a draft that violates the
//! dependency invariant is rejected with a corrective note naming the
//! violation. One retry; a second failure is a `PlanningFailure`.

use crate::engine::graph::TodoGraph;
use crate::engine::types::{TodoId, TodoItem};
use crate::oracle::protocol::TodoGraphDraft;
use crate::oracle::{OracleClient, OracleRequest};
use crate::error::TelicError;
use serde_json::Value;

const PLAN_CONTRACT: &str = r#"Decompose the request into a dependency-ordered todo graph.

Respond with exactly one JSON object matching the TodoGraphDraft contract:
{
  "mode": "direct" | "decompose",
  "complexity": "low" | "medium" | "high",
  "items": [
    {
      "id": "1",                      // hierarchical dotted id: "1", "1.1", "2", ...
      "action": "...",                // one atomic action
      "success_criterion": "...",     // observable condition proving the action worked
      "dependencies": ["1"],          // ids of items that must finish first; only earlier ids
      "max_attempts": 2               // optional
    }
  ]
}

Rules:
- every item needs id, action and success_criterion
- dependencies may only reference strictly earlier ids (an item can never depend on itself or a later item)
- keep items atomic: one observable effect each"#;

/// Adapter from a natural-language request to a validated initial graph
pub struct TaskPlanner<'a> {
    oracle: &'a OracleClient,
    default_max_attempts: u32,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(oracle: &'a OracleClient, default_max_attempts: u32) -> Self {
        Self {
            oracle,
            default_max_attempts,
        }
    }

    /// Produce the initial graph for a request
    pub async fn plan(&self, request: &str, context: &Value) -> Result<TodoGraph, TelicError> {
        let task = format!("Request:\n{}\n\n{}", request, PLAN_CONTRACT);
        let oracle_request = OracleRequest::new(task, context.clone());

        let first_violation = match self.attempt(&oracle_request).await {
            Ok(graph) => return Ok(graph),
            Err(violation) => violation,
        };

        log::warn!(
            "Initial plan rejected ({}), retrying with corrective note",
            first_violation
        );

        let corrected = OracleRequest::new(
            format!(
                "{}\n\nYour previous plan was rejected: {}. Produce a corrected \
                 TodoGraphDraft that fixes this exact violation.",
                oracle_request.task, first_violation
            ),
            context.clone(),
        );

        self.attempt(&corrected).await.map_err(|second_violation| {
            TelicError::Planning(format!(
                "plan rejected twice; first: {}; second: {}",
                first_violation, second_violation
            ))
        })
    }

    /// One oracle round-trip plus full draft validation. The error
    /// string doubles as the corrective note.
    async fn attempt(&self, request: &OracleRequest) -> Result<TodoGraph, String> {
        let value = self
            .oracle
            .complete_json(request)
            .await
            .map_err(|e| e.to_string())?;

        let draft: TodoGraphDraft = serde_json::from_value(value)
            .map_err(|e| format!("response does not match TodoGraphDraft: {}", e))?;

        self.validate_draft(draft)
    }

    fn validate_draft(&self, draft: TodoGraphDraft) -> Result<TodoGraph, String> {
        if draft.items.is_empty() {
            return Err("items[] is empty".to_string());
        }

        let mut items = Vec::with_capacity(draft.items.len());

        for (index, draft_item) in draft.items.into_iter().enumerate() {
            let position = index + 1;

            let raw_id = draft_item
                .id
                .ok_or_else(|| format!("item #{} is missing 'id'", position))?;
            let id: TodoId = raw_id
                .parse()
                .map_err(|_| format!("item #{} id '{}' is not hierarchical", position, raw_id))?;

            let action = draft_item
                .action
                .filter(|a| !a.trim().is_empty())
                .ok_or_else(|| format!("item {} is missing 'action'", id))?;

            let success_criterion = draft_item
                .success_criterion
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| format!("item {} is missing 'success_criterion'", id))?;

            let mut dependencies = Vec::with_capacity(draft_item.dependencies.len());
            for raw_dep in &draft_item.dependencies {
                let dep: TodoId = raw_dep.parse().map_err(|_| {
                    format!("item {} dependency '{}' is not hierarchical", id, raw_dep)
                })?;
                dependencies.push(dep);
            }

            items.push(TodoItem::new(
                id,
                action,
                success_criterion,
                dependencies,
                draft_item.max_attempts.unwrap_or(self.default_max_attempts),
            ));
        }

        TodoGraph::new(items).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Oracle;
    use async_trait::async_trait;
    use serde_json::json;
    use std::error::Error;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct ScriptedOracle {
        responses: Mutex<Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &OracleRequest,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.requests.lock().unwrap().push(request.task.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err("script exhausted".into());
            }
            Ok(responses.remove(0))
        }
    }

    fn good_plan() -> String {
        json!({
            "mode": "decompose",
            "complexity": "low",
            "items": [
                {"id": "1", "action": "create the file", "success_criterion": "file exists"},
                {"id": "2", "action": "verify content", "success_criterion": "content matches",
                 "dependencies": ["1"]}
            ]
        })
        .to_string()
    }

    async fn plan_with(responses: Vec<&str>) -> (Result<TodoGraph, TelicError>, Arc<ScriptedOracle>) {
        let oracle = Arc::new(ScriptedOracle::new(responses));
        let client = OracleClient::new(oracle.clone(), Duration::from_secs(5));
        let planner = TaskPlanner::new(&client, 2);
        let result = planner.plan("create notes.txt", &json!({})).await;
        (result, oracle)
    }

    #[tokio::test]
    async fn test_valid_plan_accepted_first_try() {
        let plan = good_plan();
        let (result, oracle) = plan_with(vec![&plan]).await;

        let graph = result.unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(oracle.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forward_dependency_triggers_corrective_retry() {
        let bad = json!({
            "mode": "decompose",
            "complexity": "low",
            "items": [
                {"id": "1", "action": "a", "success_criterion": "c", "dependencies": ["2"]},
                {"id": "2", "action": "b", "success_criterion": "c"}
            ]
        })
        .to_string();
        let good = good_plan();

        let (result, oracle) = plan_with(vec![&bad, &good]).await;

        assert!(result.is_ok());
        let requests = oracle.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("rejected"));
        assert!(requests[1].contains("forward or self"));
    }

    #[tokio::test]
    async fn test_missing_field_never_inferred() {
        let missing_criterion = json!({
            "mode": "direct",
            "complexity": "low",
            "items": [{"id": "1", "action": "do something"}]
        })
        .to_string();

        let (result, oracle) = plan_with(vec![&missing_criterion, &missing_criterion]).await;

        let err = result.unwrap_err();
        assert!(matches!(err, TelicError::Planning(_)));
        assert!(err.to_string().contains("success_criterion"));
        assert_eq!(oracle.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_hierarchical_id_rejected() {
        let bad_id = json!({
            "mode": "direct",
            "complexity": "low",
            "items": [{"id": "step-one", "action": "a", "success_criterion": "c"}]
        })
        .to_string();

        let (result, _) = plan_with(vec![&bad_id, &bad_id]).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("not hierarchical"));
    }

    #[tokio::test]
    async fn test_second_failure_surfaces_both_violations() {
        let empty = json!({"mode": "direct", "complexity": "low", "items": []}).to_string();
        let garbage = "no json at all";

        let (result, _) = plan_with(vec![&empty, garbage]).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("first:"));
        assert!(err.contains("second:"));
    }
}
