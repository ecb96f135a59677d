// SPDX-License-Identifier: MIT

//! Action Planner
//!
//! Per (item, backend), turns the item's action into 1-5 concrete
//! invocations strictly drawn from the backend's published catalog.
//! Nothing the oracle proposes is trusted: names are checked against
//! the catalog, parameter keys against the invocation schema,
//! placeholder text and relative paths are rejected. One corrective
//! retry, then `InvocationRejected`.

use crate::backend::{find_spec, Backend, InvocationSpec};
use crate::engine::types::{Invocation, InvocationPlan, TodoItem};
use crate::oracle::protocol::InvocationPlanDraft;
use crate::oracle::{OracleClient, OracleRequest};
use crate::error::TelicError;
use serde_json::Value;

/// Hard cap on invocations per plan; anything longer is a sign the
/// item should have been decomposed further.
const MAX_INVOCATIONS: usize = 5;

pub struct ActionPlanner<'a> {
    oracle: &'a OracleClient,
}

impl<'a> ActionPlanner<'a> {
    pub fn new(oracle: &'a OracleClient) -> Self {
        Self { oracle }
    }

    /// Produce a validated invocation plan for the item on this backend
    pub async fn plan(
        &self,
        item: &TodoItem,
        backend: &dyn Backend,
    ) -> Result<InvocationPlan, TelicError> {
        let task = self.build_task(item, backend);
        let request = OracleRequest::new(
            task,
            serde_json::json!({"item_id": item.id, "backend": backend.name()}),
        );

        let first_violation = match self.attempt(&request, backend).await {
            Ok(plan) => return Ok(plan),
            Err(violation) => violation,
        };

        log::warn!(
            "Invocation plan for item {} rejected ({}), retrying with corrective note",
            item.id,
            first_violation
        );

        let corrected = OracleRequest::new(
            format!(
                "{}\n\nYour previous plan was rejected: {}. Produce a corrected \
                 InvocationPlanDraft that fixes this exact violation.",
                request.task, first_violation
            ),
            request.context.clone(),
        );

        self.attempt(&corrected, backend)
            .await
            .map_err(|second_violation| {
                TelicError::InvocationRejected(format!(
                    "item {}: first: {}; second: {}",
                    item.id, first_violation, second_violation
                ))
            })
    }

    fn build_task(&self, item: &TodoItem, backend: &dyn Backend) -> String {
        let catalog_lines: Vec<String> = backend
            .catalog()
            .iter()
            .map(|spec| {
                format!(
                    "- {}: {}\n  parameters schema: {}",
                    spec.name,
                    spec.description,
                    serde_json::to_string(&spec.parameters).unwrap_or_default()
                )
            })
            .collect();

        format!(
            "Plan the concrete invocations that perform this action on the '{}' backend.\n\n\
             Action: {}\nSuccess criterion: {}\n\n\
             Catalog (the only invocations that exist):\n{}\n\n\
             Respond with exactly one JSON object matching the InvocationPlanDraft contract:\n\
             {{\"invocations\": [{{\"name\": \"...\", \"parameters\": {{...}}}}], \"reasoning\": \"...\"}}\n\n\
             Rules:\n\
             - at most {} invocations, executed in order\n\
             - every name must come from the catalog above\n\
             - every parameter key must exist in that invocation's schema\n\
             - all values fully resolved: no {{{{placeholders}}}}\n\
             - any path parameter must be absolute",
            backend.name(),
            item.action,
            item.success_criterion,
            catalog_lines.join("\n"),
            MAX_INVOCATIONS,
        )
    }

    async fn attempt(
        &self,
        request: &OracleRequest,
        backend: &dyn Backend,
    ) -> Result<InvocationPlan, String> {
        let value = self
            .oracle
            .complete_json(request)
            .await
            .map_err(|e| e.to_string())?;

        let draft: InvocationPlanDraft = serde_json::from_value(value)
            .map_err(|e| format!("response does not match InvocationPlanDraft: {}", e))?;

        validate_draft(draft, backend)
    }
}

/// Validate a drafted plan against the backend catalog.
///
/// A draft longer than [MAX_INVOCATIONS] is not truncated arbitrarily:
/// the longest valid prefix (up to the cap) is accepted and the plan is
/// flagged as a replanning candidate so the coordinator knows the item
/// probably needs decomposition.
fn validate_draft(draft: InvocationPlanDraft, backend: &dyn Backend) -> Result<InvocationPlan, String> {
    if draft.invocations.is_empty() {
        return Err("invocations[] is empty".to_string());
    }

    let catalog = backend.catalog();
    let oversized = draft.invocations.len() > MAX_INVOCATIONS;

    let mut accepted = Vec::new();
    for (index, draft_invocation) in draft.invocations.into_iter().enumerate() {
        match validate_invocation(&draft_invocation.name, &draft_invocation.parameters, catalog) {
            Ok(()) => {
                accepted.push(Invocation {
                    name: draft_invocation.name,
                    parameters: if draft_invocation.parameters.is_null() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        draft_invocation.parameters
                    },
                });
                if accepted.len() == MAX_INVOCATIONS {
                    break;
                }
            }
            Err(violation) if oversized => {
                // Oversized drafts keep their valid prefix
                log::warn!(
                    "Dropping invocation #{} from oversized plan: {}",
                    index + 1,
                    violation
                );
                break;
            }
            Err(violation) => {
                return Err(format!("invocation #{}: {}", index + 1, violation));
            }
        }
    }

    if accepted.is_empty() {
        return Err("no valid invocation at the start of the plan".to_string());
    }

    Ok(InvocationPlan {
        backend: backend.name().to_string(),
        invocations: accepted,
        replan_candidate: oversized,
    })
}

fn validate_invocation(
    name: &str,
    parameters: &Value,
    catalog: &[InvocationSpec],
) -> Result<(), String> {
    let spec = find_spec(catalog, name)
        .ok_or_else(|| format!("'{}' is not in the catalog", name))?;

    let params = match parameters {
        Value::Object(map) => map,
        Value::Null => return check_required(spec, &serde_json::Map::new()),
        other => return Err(format!("parameters must be an object, got {}", other)),
    };

    // Keys must exist in the schema, when the schema declares them
    if let Some(properties) = spec.parameters.get("properties").and_then(|p| p.as_object()) {
        for key in params.keys() {
            if !properties.contains_key(key) {
                return Err(format!("parameter '{}' not in schema of '{}'", key, name));
            }
        }
    }

    check_required(spec, params)?;

    for (key, value) in params {
        scan_value(name, key, value)?;
    }

    Ok(())
}

fn check_required(
    spec: &InvocationSpec,
    params: &serde_json::Map<String, Value>,
) -> Result<(), String> {
    if let Some(required) = spec.parameters.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !params.contains_key(key) {
                return Err(format!(
                    "required parameter '{}' missing for '{}'",
                    key, spec.name
                ));
            }
        }
    }
    Ok(())
}

/// Reject unresolved placeholders and relative path-like values,
/// recursing into nested structures.
fn scan_value(invocation: &str, key: &str, value: &Value) -> Result<(), String> {
    match value {
        Value::String(s) => {
            if s.contains("{{") || s.contains("}}") {
                return Err(format!(
                    "parameter '{}' of '{}' contains an unresolved placeholder: '{}'",
                    key, invocation, s
                ));
            }
            if is_path_like(key) && !s.starts_with('/') {
                return Err(format!(
                    "path parameter '{}' of '{}' must be absolute, got '{}'",
                    key, invocation, s
                ));
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| scan_value(invocation, key, item)),
        Value::Object(map) => map
            .iter()
            .try_for_each(|(nested_key, nested)| scan_value(invocation, nested_key, nested)),
        _ => Ok(()),
    }
}

fn is_path_like(key: &str) -> bool {
    key == "path"
        || key == "cwd"
        || key == "directory"
        || key.ends_with("_path")
        || key.ends_with("_dir")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InvocationOutcome;
    use crate::engine::types::TodoId;
    use crate::oracle::Oracle;
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use serde_json::json;
    use std::error::Error;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    static TEST_CATALOG: Lazy<Vec<InvocationSpec>> = Lazy::new(|| {
        vec![
            InvocationSpec::new(
                "write_file",
                "write a file",
                json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                    "required": ["path", "content"]
                }),
            ),
            InvocationSpec::read_only(
                "stat_file",
                "stat a file",
                json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            ),
        ]
    });

    struct TestBackend;

    #[async_trait]
    impl Backend for TestBackend {
        fn name(&self) -> &str {
            "fs"
        }
        fn description(&self) -> &str {
            "test fs"
        }
        fn catalog(&self) -> &[InvocationSpec] {
            &TEST_CATALOG
        }
        async fn invoke(
            &self,
            _name: &str,
            _parameters: Value,
        ) -> Result<InvocationOutcome, Box<dyn Error + Send + Sync>> {
            Ok(InvocationOutcome::ok(Value::Null))
        }
    }

    struct ScriptedOracle(Mutex<Vec<String>>);

    #[async_trait]
    impl Oracle for ScriptedOracle {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _request: &OracleRequest,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            let mut responses = self.0.lock().unwrap();
            if responses.is_empty() {
                return Err("script exhausted".into());
            }
            Ok(responses.remove(0))
        }
    }

    fn item() -> TodoItem {
        TodoItem::new(
            TodoId::root(1),
            "create notes.txt with hello",
            "file exists with content hello",
            vec![],
            2,
        )
    }

    async fn plan_with(responses: Vec<&str>) -> Result<InvocationPlan, TelicError> {
        let oracle = Arc::new(ScriptedOracle(Mutex::new(
            responses.into_iter().map(String::from).collect(),
        )));
        let client = OracleClient::new(oracle, Duration::from_secs(5));
        let planner = ActionPlanner::new(&client);
        planner.plan(&item(), &TestBackend).await
    }

    fn draft(invocations: Vec<Value>) -> String {
        json!({"invocations": invocations, "reasoning": "test"}).to_string()
    }

    #[tokio::test]
    async fn test_valid_plan_accepted() {
        let response = draft(vec![json!({
            "name": "write_file",
            "parameters": {"path": "/tmp/notes.txt", "content": "hello"}
        })]);

        let plan = plan_with(vec![&response]).await.unwrap();
        assert_eq!(plan.backend, "fs");
        assert_eq!(plan.invocations.len(), 1);
        assert!(!plan.replan_candidate);
    }

    #[tokio::test]
    async fn test_unknown_invocation_always_rejected() {
        let response = draft(vec![json!({
            "name": "format_disk",
            "parameters": {}
        })]);

        let err = plan_with(vec![&response, &response]).await.unwrap_err();
        assert!(matches!(err, TelicError::InvocationRejected(_)));
        assert!(err.to_string().contains("not in the catalog"));
    }

    #[tokio::test]
    async fn test_unknown_parameter_key_rejected_then_corrected() {
        let bad = draft(vec![json!({
            "name": "write_file",
            "parameters": {"path": "/tmp/x", "content": "y", "mode": "overwrite"}
        })]);
        let good = draft(vec![json!({
            "name": "write_file",
            "parameters": {"path": "/tmp/x", "content": "y"}
        })]);

        let plan = plan_with(vec![&bad, &good]).await.unwrap();
        assert_eq!(plan.invocations.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_required_parameter_rejected() {
        let response = draft(vec![json!({
            "name": "write_file",
            "parameters": {"path": "/tmp/x"}
        })]);

        let err = plan_with(vec![&response, &response]).await.unwrap_err();
        assert!(err.to_string().contains("required parameter 'content'"));
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_rejected() {
        let response = draft(vec![json!({
            "name": "write_file",
            "parameters": {"path": "/tmp/{{filename}}", "content": "hello"}
        })]);

        let err = plan_with(vec![&response, &response]).await.unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let response = draft(vec![json!({
            "name": "stat_file",
            "parameters": {"path": "notes.txt"}
        })]);

        let err = plan_with(vec![&response, &response]).await.unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[tokio::test]
    async fn test_oversized_plan_keeps_prefix_and_flags_replan() {
        let invocation = json!({
            "name": "stat_file",
            "parameters": {"path": "/tmp/x"}
        });
        let response = draft(vec![invocation.clone(); 7]);

        let plan = plan_with(vec![&response]).await.unwrap();
        assert_eq!(plan.invocations.len(), 5);
        assert!(plan.replan_candidate);
    }

    #[tokio::test]
    async fn test_oversized_plan_stops_prefix_at_first_invalid() {
        let good = json!({"name": "stat_file", "parameters": {"path": "/tmp/x"}});
        let bad = json!({"name": "bogus", "parameters": {}});
        let response = draft(vec![
            good.clone(),
            good.clone(),
            bad,
            good.clone(),
            good.clone(),
            good.clone(),
        ]);

        let plan = plan_with(vec![&response]).await.unwrap();
        assert_eq!(plan.invocations.len(), 2);
        assert!(plan.replan_candidate);
    }

    #[tokio::test]
    async fn test_empty_plan_rejected() {
        let response = draft(vec![]);
        let err = plan_with(vec![&response, &response]).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
