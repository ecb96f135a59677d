// SPDX-License-Identifier: MIT

//! MCP bridge backend
//!
//! Connects to an external MCP server over stdio and exposes the
//! server's tool list as this backend's invocation catalog. The
//! catalog is fetched once at connect time; MCP servers advertise
//! their schemas up front, which is exactly the published-catalog
//! contract the action planner validates against.

use crate::backend::{Backend, InvocationOutcome, InvocationSpec};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{ClientHandler, ServiceExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;

/// Configuration for one MCP server bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineClientHandler;

impl ClientHandler for EngineClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "telic-rs".to_string(),
                version: "0.1.0".to_string(),
                ..Default::default()
            },
        }
    }
}

type McpService = RunningService<RoleClient, EngineClientHandler>;

/// An external MCP server exposed as an execution backend
pub struct McpBackend {
    name: String,
    description: String,
    service: Arc<RwLock<McpService>>,
    catalog: Vec<InvocationSpec>,
}

impl McpBackend {
    /// Spawn the server process, connect over stdio, and snapshot its
    /// tool list into an invocation catalog.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        log::info!(
            "Connecting MCP backend '{}' via: {} {:?}",
            config.name,
            config.command,
            config.args
        );

        let mut server_cmd = Command::new(&config.command);
        for arg in &config.args {
            server_cmd.arg(arg);
        }

        let transport = TokioChildProcess::new(server_cmd)?;
        let service = EngineClientHandler.serve(transport).await?;

        let tools = service.list_all_tools().await?;
        let catalog: Vec<InvocationSpec> = tools
            .into_iter()
            .map(|tool| InvocationSpec {
                name: tool.name.to_string(),
                description: tool.description.unwrap_or_default().to_string(),
                parameters: serde_json::to_value(&tool.input_schema).unwrap_or_default(),
                // MCP servers do not declare mutability, so no tool is
                // eligible as a read-only verification probe.
                read_only: false,
            })
            .collect();

        log::info!(
            "MCP backend '{}' published {} invocations",
            config.name,
            catalog.len()
        );

        Ok(Self {
            name: config.name.clone(),
            description: format!("MCP server '{}' bridged over stdio", config.name),
            service: Arc::new(RwLock::new(service)),
            catalog,
        })
    }
}

#[async_trait]
impl Backend for McpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn catalog(&self) -> &[InvocationSpec] {
        &self.catalog
    }

    async fn invoke(
        &self,
        name: &str,
        parameters: Value,
    ) -> Result<InvocationOutcome, Box<dyn Error + Send + Sync>> {
        if !self.catalog.iter().any(|spec| spec.name == name) {
            return Err(format!("invocation '{}' not in MCP catalog '{}'", name, self.name).into());
        }

        let arguments = match parameters {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Ok(InvocationOutcome::failed(format!(
                    "MCP invocation parameters must be an object, got {}",
                    other
                )))
            }
        };

        let service = self.service.read().await;
        let result = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await?;

        let is_error = result.is_error.unwrap_or(false);
        let output = serde_json::to_value(&result)?;

        Ok(if is_error {
            InvocationOutcome {
                success: false,
                output: output.clone(),
                error: Some(format!("MCP tool '{}' reported an error", name)),
                evidence: None,
            }
        } else {
            InvocationOutcome::ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_with_default_args() {
        let yaml = r#"
            name: files
            command: npx
        "#;
        let config: McpServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "files");
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_config_deserializes_args() {
        let yaml = r#"
            name: everything
            command: npx
            args: ["-y", "@modelcontextprotocol/server-everything"]
        "#;
        let config: McpServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.args.len(), 2);
    }
}
