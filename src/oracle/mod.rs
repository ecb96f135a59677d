// SPDX-License-Identifier: MIT

//! Oracle module - the external planning/reasoning service seam
//!
//! This module provides the core [Oracle] trait and the [OracleClient]
//! wrapper that every engine component goes through. The client adds
//! the two defenses the raw providers do not have: an independent
//! timeout per round-trip, and schema validation with one corrective
//! retry before any response is trusted.
//!
//! Provider implementations are in their own submodules:
//! - [anthropic] - Anthropic's Claude API
//! - [openai] - OpenAI's chat completions API

pub mod anthropic;
pub mod openai;
pub mod protocol;

use crate::error::OracleError;
use async_trait::async_trait;
use protocol::{Contract, OracleResponse};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// One structured oracle request: a task description plus a context
/// bundle of whatever structured state the component wants considered.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub task: String,
    pub context: Value,
}

impl OracleRequest {
    pub fn new(task: impl Into<String>, context: Value) -> Self {
        Self {
            task: task.into(),
            context,
        }
    }
}

/// Core trait for oracle provider implementations
///
/// A provider performs exactly one blocking round-trip and returns the
/// raw text of the response. Parsing and validation live in
/// [OracleClient], never in providers.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Provider name, used in logs and error messages
    fn name(&self) -> &str;

    /// Perform one round-trip to the reasoning service
    async fn complete(
        &self,
        request: &OracleRequest,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Validating client wrapper around an [Oracle]
///
/// Cheap to clone; engine components hold it by reference.
#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn Oracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Provider name of the wrapped oracle
    pub fn provider(&self) -> &str {
        self.oracle.name()
    }

    /// One raw round-trip with timeout, returning the extracted JSON
    /// object. No retry at this layer.
    pub async fn complete_json(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let text = tokio::time::timeout(self.timeout, self.oracle.complete(request))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| OracleError::api(self.oracle.name(), e.to_string()))?;

        protocol::extract_json_object(&text)
    }

    /// Ask for a specific contract, retrying once with a corrective
    /// note describing the violation. A second failure surfaces the
    /// protocol violation to the caller.
    pub async fn ask<C>(&self, request: &OracleRequest) -> Result<C, OracleError>
    where
        C: Contract,
    {
        match self.try_ask::<C>(request).await {
            Ok(contract) => Ok(contract),
            Err(first) => {
                log::warn!(
                    "Oracle response rejected ({}), retrying with corrective note",
                    first
                );
                let corrected = OracleRequest {
                    task: format!(
                        "{}\n\nYour previous response was rejected: {}. \
                         Respond with exactly one JSON object matching the {} contract \
                         and nothing else.",
                        request.task, first, C::KIND
                    ),
                    context: request.context.clone(),
                };
                self.try_ask::<C>(&corrected).await
            }
        }
    }

    async fn try_ask<C>(&self, request: &OracleRequest) -> Result<C, OracleError>
    where
        C: Contract,
    {
        let value = self.complete_json(request).await?;

        let response: OracleResponse = serde_json::from_value(value).map_err(|e| {
            OracleError::protocol(format!("response matches no known contract: {}", e))
        })?;

        let kind = response.kind();
        C::from_response(response).ok_or_else(|| {
            OracleError::protocol(format!("expected {} but oracle returned {}", C::KIND, kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::protocol::{BackendSelection, VerificationVerdict};
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted oracle returning canned responses in order
    struct ScriptedOracle {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
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
            _request: &OracleRequest,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err("script exhausted".into());
            }
            Ok(responses.remove(0))
        }
    }

    fn client(responses: Vec<&str>) -> OracleClient {
        OracleClient::new(
            Arc::new(ScriptedOracle::new(responses)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_ask_parses_contract() {
        let client = client(vec![
            r#"{"verified": true, "confidence": 92, "reason": "looks right"}"#,
        ]);

        let verdict: VerificationVerdict = client
            .ask(&OracleRequest::new("verify", json!({})))
            .await
            .unwrap();
        assert!(verdict.verified);
        assert_eq!(verdict.confidence, 92);
    }

    #[tokio::test]
    async fn test_ask_retries_once_on_garbage() {
        let client = client(vec![
            "I think the best backends would be fs and shell.",
            r#"{"backends": ["fs"], "confidence": 80, "reasoning": "file work"}"#,
        ]);

        let selection: BackendSelection = client
            .ask(&OracleRequest::new("select", json!({})))
            .await
            .unwrap();
        assert_eq!(selection.backends, vec!["fs".to_string()]);
    }

    #[tokio::test]
    async fn test_ask_retries_once_on_wrong_contract() {
        let client = client(vec![
            r#"{"mode": "direct", "confidence": 90, "reasoning": "simple"}"#,
            r#"{"backends": ["shell"], "confidence": 70, "reasoning": "command work"}"#,
        ]);

        let selection: BackendSelection = client
            .ask(&OracleRequest::new("select", json!({})))
            .await
            .unwrap();
        assert_eq!(selection.backends, vec!["shell".to_string()]);
    }

    #[tokio::test]
    async fn test_ask_surfaces_second_failure() {
        let client = client(vec!["no json here", "still no json"]);

        let result: Result<BackendSelection, _> =
            client.ask(&OracleRequest::new("select", json!({}))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        struct SlowOracle;

        #[async_trait]
        impl Oracle for SlowOracle {
            fn name(&self) -> &str {
                "slow"
            }

            async fn complete(
                &self,
                _request: &OracleRequest,
            ) -> Result<String, Box<dyn Error + Send + Sync>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }

        let client = OracleClient::new(Arc::new(SlowOracle), Duration::from_millis(20));
        let err = client
            .complete_json(&OracleRequest::new("anything", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
    }
}
