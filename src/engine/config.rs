// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Loaded from YAML or built from defaults. The spec-level thresholds
//! live here so deployments can tune them without touching code.

use crate::backend::mcp::McpServerConfig;
use crate::error::TelicError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_max_attempts() -> u32 {
    2
}

fn default_oracle_timeout() -> u64 {
    60
}

fn default_invocation_timeout() -> u64 {
    120
}

fn default_selector_threshold() -> u8 {
    60
}

fn default_verification_threshold() -> u8 {
    70
}

fn default_inconclusive_threshold() -> u8 {
    40
}

fn default_sandbox_root() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry budget per item before the replanner is consulted
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Timeout for each oracle round-trip, in seconds
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,

    /// Timeout for each backend invocation, in seconds
    #[serde(default = "default_invocation_timeout")]
    pub invocation_timeout_secs: u64,

    /// Below this, backend selection falls back to the deterministic
    /// default instead of guessing
    #[serde(default = "default_selector_threshold")]
    pub selector_confidence_threshold: u8,

    /// Verification confidence gate: at or above is Verified
    #[serde(default = "default_verification_threshold")]
    pub verification_threshold: u8,

    /// Below this, data evidence counts as inconclusive and the
    /// verifier falls back to the visual path
    #[serde(default = "default_inconclusive_threshold")]
    pub inconclusive_threshold: u8,

    /// Root directory the file-storage backend is confined to
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: String,

    /// External MCP servers to bridge in as backends
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            oracle_timeout_secs: default_oracle_timeout(),
            invocation_timeout_secs: default_invocation_timeout(),
            selector_confidence_threshold: default_selector_threshold(),
            verification_threshold: default_verification_threshold(),
            inconclusive_threshold: default_inconclusive_threshold(),
            sandbox_root: default_sandbox_root(),
            mcp_servers: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, TelicError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, TelicError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_attempts, 2);
        assert_eq!(config.selector_confidence_threshold, 60);
        assert_eq!(config.verification_threshold, 70);
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn test_parse_partial_yaml_fills_defaults() {
        let config = EngineConfig::parse_yaml("default_max_attempts: 3\n").unwrap();
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.verification_threshold, 70);
    }

    #[test]
    fn test_parse_mcp_servers() {
        let yaml = r#"
sandbox_root: /tmp/telic
mcp_servers:
  - name: everything
    command: npx
    args: ["-y", "@modelcontextprotocol/server-everything"]
"#;
        let config = EngineConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.sandbox_root, "/tmp/telic");
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].name, "everything");
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(EngineConfig::parse_yaml("default_max_attempts: [nope").is_err());
    }
}
