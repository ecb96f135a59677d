// SPDX-License-Identifier: MIT

//! Oracle response protocol
//!
//! The oracle is a fallible natural-language service: every response
//! must parse as exactly one JSON object matching one of the contracts
//! below before it is trusted anywhere downstream. Anything else is a
//! protocol violation, never data to interpret.

use crate::error::OracleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Workflow planning mode proposed by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Single-step request, no decomposition needed
    Direct,
    /// Multi-step request decomposed into a dependency graph
    Decompose,
}

/// Request complexity estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Replanning strategy after a retry budget is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanStrategy {
    /// Insert new items pursuing a different tactic, then continue
    ReplanAndContinue,
    /// Soft-delete the failed item, continue with the rest
    SkipAndContinue,
    /// No recovery possible, halt the workflow
    Abort,
}

/// Root-cause classification of an exhausted failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    /// The chosen tactic cannot achieve the criterion
    ApproachWrong,
    /// A required application or surface is not available
    EnvironmentUnavailable,
    /// A required input artifact is missing
    ResourceMissing,
    /// Transient or technical failure
    Transient,
}

/// Mode decision contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDecision {
    pub mode: PlanMode,
    pub confidence: u8,
    pub reasoning: String,
}

/// One drafted item inside a [TodoGraphDraft]
///
/// All fields are optional at the parse layer so that the planner can
/// name the exact missing field in its corrective retry instead of
/// surfacing an opaque serde error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub id: Option<String>,
    pub action: Option<String>,
    pub success_criterion: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub max_attempts: Option<u32>,
}

/// Initial plan contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoGraphDraft {
    pub mode: PlanMode,
    pub complexity: Complexity,
    pub items: Vec<DraftItem>,
}

/// Backend selection contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSelection {
    pub backends: Vec<String>,
    pub confidence: u8,
    pub reasoning: String,
}

/// One drafted invocation inside an [InvocationPlanDraft]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftInvocation {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Invocation plan contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationPlanDraft {
    pub invocations: Vec<DraftInvocation>,
    pub reasoning: String,
}

/// Verification verdict contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub verified: bool,
    pub confidence: u8,
    pub reason: String,
    #[serde(default)]
    pub evidence: Value,
    pub repair_suggestion: Option<String>,
}

/// One drafted replacement item inside a [ReplanVerdict]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanItemDraft {
    pub action: String,
    pub success_criterion: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Replanning verdict contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanVerdict {
    pub strategy: ReplanStrategy,
    pub root_cause: Option<RootCause>,
    pub essential: Option<bool>,
    #[serde(default)]
    pub new_items: Vec<ReplanItemDraft>,
    pub reasoning: String,
}

/// The union of all valid oracle responses
///
/// Variant order matters: serde tries untagged variants top to bottom,
/// so the contracts with the most distinctive required fields come
/// first.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OracleResponse {
    GraphDraft(TodoGraphDraft),
    InvocationPlan(InvocationPlanDraft),
    Replan(ReplanVerdict),
    Verification(VerificationVerdict),
    Selection(BackendSelection),
    Mode(ModeDecision),
}

impl OracleResponse {
    /// Contract name, used in protocol-violation messages
    pub fn kind(&self) -> &'static str {
        match self {
            OracleResponse::GraphDraft(_) => "TodoGraphDraft",
            OracleResponse::InvocationPlan(_) => "InvocationPlanDraft",
            OracleResponse::Replan(_) => "ReplanVerdict",
            OracleResponse::Verification(_) => "VerificationVerdict",
            OracleResponse::Selection(_) => "BackendSelection",
            OracleResponse::Mode(_) => "ModeDecision",
        }
    }
}

/// A typed oracle contract extractable from an [OracleResponse]
pub trait Contract: Sized {
    /// Contract name, used in prompts and violation messages
    const KIND: &'static str;

    /// Extract this contract from a parsed response, if it matches
    fn from_response(response: OracleResponse) -> Option<Self>;
}

macro_rules! impl_contract {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl Contract for $ty {
            const KIND: &'static str = $kind;

            fn from_response(response: OracleResponse) -> Option<Self> {
                match response {
                    OracleResponse::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_contract!(TodoGraphDraft, GraphDraft, "TodoGraphDraft");
impl_contract!(InvocationPlanDraft, InvocationPlan, "InvocationPlanDraft");
impl_contract!(ReplanVerdict, Replan, "ReplanVerdict");
impl_contract!(VerificationVerdict, Verification, "VerificationVerdict");
impl_contract!(BackendSelection, Selection, "BackendSelection");
impl_contract!(ModeDecision, Mode, "ModeDecision");

/// Extract exactly one JSON object from raw oracle output.
///
/// Oracles wrap JSON in prose and code fences no matter how firmly the
/// prompt forbids it, so this scans for the first balanced top-level
/// object, respecting string literals and escapes.
pub fn extract_json_object(text: &str) -> Result<Value, OracleError> {
    let start = text
        .find('{')
        .ok_or_else(|| OracleError::protocol("response contains no JSON object"))?;

    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate).map_err(|e| {
                        OracleError::protocol(format!("JSON object failed to parse: {}", e))
                    });
                }
            }
            _ => {}
        }
    }

    Err(OracleError::protocol("unterminated JSON object in response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_bare_object() {
        let value = extract_json_object(r#"{"mode": "direct"}"#).unwrap();
        assert_eq!(value["mode"], "direct");
    }

    #[test]
    fn test_extract_from_code_fence() {
        let text = "Here is the plan:\n```json\n{\"verified\": true, \"confidence\": 90, \"reason\": \"file exists\"}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["confidence"], 90);
    }

    #[test]
    fn test_extract_respects_braces_in_strings() {
        let text = r#"{"reason": "output was {weird}", "verified": false, "confidence": 10}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["reason"], "output was {weird}");
    }

    #[test]
    fn test_extract_no_object_is_protocol_violation() {
        let err = extract_json_object("I could not produce a plan.").unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn test_extract_unterminated_object() {
        let err = extract_json_object(r#"{"mode": "direct""#).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_response_union_graph_draft() {
        let value = json!({
            "mode": "decompose",
            "complexity": "low",
            "items": [
                {"id": "1", "action": "create the file", "success_criterion": "file exists"}
            ]
        });

        let response: OracleResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.kind(), "TodoGraphDraft");

        let draft = TodoGraphDraft::from_response(response).unwrap();
        assert_eq!(draft.mode, PlanMode::Decompose);
        assert_eq!(draft.items.len(), 1);
        assert!(draft.items[0].dependencies.is_empty());
    }

    #[test]
    fn test_response_union_verdict() {
        let value = json!({
            "verified": true,
            "confidence": 85,
            "reason": "content matches criterion"
        });

        let response: OracleResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.kind(), "VerificationVerdict");
    }

    #[test]
    fn test_response_union_selection_vs_mode() {
        let selection = json!({
            "backends": ["fs"],
            "confidence": 80,
            "reasoning": "file work"
        });
        let mode = json!({
            "mode": "direct",
            "confidence": 95,
            "reasoning": "single step"
        });

        let r1: OracleResponse = serde_json::from_value(selection).unwrap();
        let r2: OracleResponse = serde_json::from_value(mode).unwrap();
        assert_eq!(r1.kind(), "BackendSelection");
        assert_eq!(r2.kind(), "ModeDecision");
    }

    #[test]
    fn test_wrong_variant_extraction_returns_none() {
        let value = json!({
            "backends": ["shell"],
            "confidence": 40,
            "reasoning": "unsure"
        });
        let response: OracleResponse = serde_json::from_value(value).unwrap();
        assert!(TodoGraphDraft::from_response(response).is_none());
    }

    #[test]
    fn test_replan_verdict_defaults() {
        let value = json!({
            "strategy": "skip_and_continue",
            "reasoning": "decorative screenshot, goal already met"
        });
        let verdict: ReplanVerdict = serde_json::from_value(value).unwrap();
        assert_eq!(verdict.strategy, ReplanStrategy::SkipAndContinue);
        assert!(verdict.new_items.is_empty());
        assert!(verdict.root_cause.is_none());
    }

    #[test]
    fn test_strategy_wire_names() {
        assert_eq!(
            serde_json::to_value(ReplanStrategy::ReplanAndContinue).unwrap(),
            json!("replan_and_continue")
        );
        assert_eq!(
            serde_json::to_value(RootCause::EnvironmentUnavailable).unwrap(),
            json!("environment_unavailable")
        );
    }
}
