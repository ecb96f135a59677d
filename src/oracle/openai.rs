// SPDX-License-Identifier: MIT

//! OpenAI oracle - chat completions implementation

use super::{Oracle, OracleRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::error::Error;

const SYSTEM_PROMPT: &str = "You are the planning oracle of a task decomposition and \
execution engine. Every reply must be exactly one JSON object matching the contract \
named in the request, with no prose, no markdown fences, and no trailing commentary.";

/// OpenAI chat-completions oracle implementation
pub struct OpenAIOracle {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIOracle {
    /// Create a new OpenAIOracle
    ///
    /// Requires `OPENAI_API_KEY` environment variable to be set.
    /// Optionally uses `OPENAI_BASE_URL` for custom endpoints.
    pub fn new(model_name: String) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY must be set")?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url,
        })
    }

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

    /// Pull the assistant message text out of a chat-completions response
    fn parse_response(response: &serde_json::Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or("No choices in OpenAI response")?;

        let content = choice["message"]["content"]
            .as_str()
            .ok_or("No message content in OpenAI response")?;

        if content.is_empty() {
            return Err("OpenAI response content was empty".into());
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl Oracle for OpenAIOracle {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: &OracleRequest,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model_name,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::build_user_message(request)}
            ],
            "response_format": {"type": "json_object"}
        });

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("OpenAI API error: {}", text).into());
        }

        let resp_json: serde_json::Value = resp.json().await?;
        Self::parse_response(&resp_json)
    }
}
