// SPDX-License-Identifier: MIT

//! Command-execution backend
//!
//! The most general surface in the registry, and the deterministic
//! fallback when backend selection confidence is low. Every invocation
//! runs under its own timeout; a timed-out process is killed and
//! reported as a hard failure.

use crate::backend::{Backend, InvocationOutcome, InvocationSpec};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCommandArgs {
    /// Program to execute
    pub program: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Absolute working directory, if any
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WhichArgs {
    /// Program name to look up on PATH
    pub program: String,
}

/// Command-execution backend
pub struct ShellBackend {
    timeout: Duration,
    catalog: Vec<InvocationSpec>,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

impl ShellBackend {
    pub fn new(timeout: Duration) -> Self {
        let catalog = vec![
            InvocationSpec::new(
                "run_command",
                "Run a program with arguments and capture its output",
                schema_of::<RunCommandArgs>(),
            ),
            InvocationSpec::read_only(
                "which",
                "Check whether a program is available on PATH",
                schema_of::<WhichArgs>(),
            ),
        ];

        Self { timeout, catalog }
    }

    async fn run_command(&self, args: RunCommandArgs) -> InvocationOutcome {
        if let Some(cwd) = &args.cwd {
            if !std::path::Path::new(cwd).is_absolute() {
                return InvocationOutcome::failed(format!("cwd '{}' is not absolute", cwd));
            }
        }

        let mut command = Command::new(&args.program);
        command
            .args(&args.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &args.cwd {
            command.current_dir(cwd);
        }

        log::info!("Running command: {} {:?}", args.program, args.args);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return InvocationOutcome::failed(format!("spawn '{}': {}", args.program, e))
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return InvocationOutcome::failed(format!("wait for '{}': {}", args.program, e))
            }
            Err(_) => {
                return InvocationOutcome::failed(format!(
                    "'{}' timed out after {} seconds",
                    args.program,
                    self.timeout.as_secs()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if output.status.success() {
            InvocationOutcome::ok(json!({
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            }))
        } else {
            InvocationOutcome {
                success: false,
                output: json!({
                    "exit_code": exit_code,
                    "stdout": stdout,
                    "stderr": stderr.clone(),
                }),
                error: Some(format!(
                    "'{}' exited with {:?}: {}",
                    args.program,
                    exit_code,
                    stderr.trim()
                )),
                evidence: None,
            }
        }
    }

    async fn which(&self, args: WhichArgs) -> InvocationOutcome {
        // Resolve through the platform lookup instead of shelling out.
        let found = std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| {
                    let candidate = dir.join(&args.program);
                    candidate.is_file()
                })
            })
            .unwrap_or(false);

        InvocationOutcome::ok(json!({"program": args.program, "found": found}))
    }
}

#[async_trait]
impl Backend for ShellBackend {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Command execution: run programs with arguments and capture their output"
    }

    fn catalog(&self) -> &[InvocationSpec] {
        &self.catalog
    }

    async fn invoke(
        &self,
        name: &str,
        parameters: Value,
    ) -> Result<InvocationOutcome, Box<dyn Error + Send + Sync>> {
        let outcome = match name {
            "run_command" => self.run_command(serde_json::from_value(parameters)?).await,
            "which" => self.which(serde_json::from_value(parameters)?).await,
            other => return Err(format!("invocation '{}' not in shell catalog", other).into()),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> ShellBackend {
        ShellBackend::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let outcome = shell()
            .invoke("run_command", json!({"program": "echo", "args": ["hello"]}))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output["exit_code"], 0);
        assert!(outcome.output["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let outcome = shell()
            .invoke("run_command", json!({"program": "false"}))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        // Partial output is preserved even on failure
        assert_eq!(outcome.output["exit_code"], 1);
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let outcome = shell()
            .invoke(
                "run_command",
                json!({"program": "definitely-not-a-real-program-xyz"}),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("spawn"));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let backend = ShellBackend::new(Duration::from_millis(50));
        let outcome = backend
            .invoke("run_command", json!({"program": "sleep", "args": ["5"]}))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_relative_cwd_rejected() {
        let outcome = shell()
            .invoke(
                "run_command",
                json!({"program": "echo", "cwd": "relative/dir"}),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_which_finds_common_program() {
        let outcome = shell()
            .invoke("which", json!({"program": "echo"}))
            .await
            .unwrap();

        assert!(outcome.success);
        // echo exists as a binary on effectively every test platform
        assert_eq!(outcome.output["found"], true);
    }

    #[tokio::test]
    async fn test_which_reports_missing_program() {
        let outcome = shell()
            .invoke("which", json!({"program": "no-such-binary-xyz"}))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output["found"], false);
    }
}
