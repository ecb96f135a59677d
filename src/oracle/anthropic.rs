//! Anthropic oracle - Claude API implementation

use super::{Oracle, OracleRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::error::Error;

const SYSTEM_PROMPT: &str = "You are the planning oracle of a task decomposition and \
execution engine. Every reply must be exactly one JSON object matching the contract \
named in the request, with no prose, no markdown fences, and no trailing commentary.";

/// Anthropic Claude oracle implementation
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl AnthropicOracle {
    /// Create a new AnthropicOracle
    ///
    /// Requires `ANTHROPIC_API_KEY` environment variable to be set.
    /// Optionally uses `ANTHROPIC_BASE_URL` for custom endpoints.
    pub fn new(model_name: String) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| "ANTHROPIC_API_KEY must be set")?;
        let base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url,
        })
    }

    /// Build the user message for a structured request
    fn build_user_message(request: &OracleRequest) -> String {
        if request.context.is_null() {
            request.task.clone()
        } else {
            format!(
                "{}\n\nStructured context:\n{}",
                request.task,
                serde_json::to_string_pretty(&request.context).unwrap_or_default()
            )
        }
    }

    /// Concatenate the text blocks of an Anthropic response
    fn parse_response(response: &serde_json::Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let content_blocks = response["content"]
            .as_array()
            .ok_or("No content in Anthropic response")?;

        let mut text = String::new();
        for block in content_blocks {
            if block["type"].as_str() == Some("text") {
                if let Some(t) = block["text"].as_str() {
                    text.push_str(t);
                }
            }
        }

        if text.is_empty() {
            return Err("Anthropic response contained no text blocks".into());
        }

        if let Some(stop_reason) = response["stop_reason"].as_str() {
            log::debug!("Anthropic stop reason: {}", stop_reason);
        }

        Ok(text)
    }
}

#[async_trait]
impl Oracle for AnthropicOracle {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: &OracleRequest,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/messages", self.base_url);

        let body = json!({
            "model": self.model_name,
            "max_tokens": 4096,
            "system": SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": Self::build_user_message(request)
            }]
        });

        log::debug!(
            "Anthropic request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("Anthropic API error: {}", text).into());
        }

        let resp_json: serde_json::Value = resp.json().await?;
        Self::parse_response(&resp_json)
    }
}
