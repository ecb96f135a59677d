// SPDX-License-Identifier: MIT

//! Backend module - execution surfaces with published invocation catalogs
//!
//! A backend is a concrete automation surface (file storage, command
//! execution, an MCP server, ...) exposing a fixed catalog of named
//! invocations. The catalog is the sole source of truth consulted by
//! the action planner; invocations outside it are rejected before they
//! ever reach [Backend::invoke].

pub mod fs;
pub mod mcp;
pub mod registry;
pub mod shell;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use uuid::Uuid;

/// One published invocation: a name plus the JSON schema of its
/// parameters. `read_only` marks invocations safe for verification
/// probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub read_only: bool,
}

impl InvocationSpec {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            read_only: false,
        }
    }

    pub fn read_only(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            read_only: true,
        }
    }
}

/// What kind of evidence a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// A data artifact (file, record, command output)
    Artifact,
    /// A visual snapshot of some surface
    Snapshot,
}

/// Reference to side-effect evidence produced by an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub id: String,
    pub kind: EvidenceKind,
    /// Backend-meaningful locator (path, URL, snapshot handle)
    pub location: String,
}

impl EvidenceRef {
    pub fn artifact(location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: EvidenceKind::Artifact,
            location: location.into(),
        }
    }

    pub fn snapshot(location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: EvidenceKind::Snapshot,
            location: location.into(),
        }
    }
}

/// Result of one backend invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub evidence: Option<EvidenceRef>,
}

impl InvocationOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            evidence: None,
        }
    }

    pub fn ok_with_evidence(output: Value, evidence: EvidenceRef) -> Self {
        Self {
            success: true,
            output,
            error: None,
            evidence: Some(evidence),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            evidence: None,
        }
    }
}

/// Trait for execution backends.
///
/// # Optimization Notes
/// - `name()` and `description()` return `&str` to avoid allocation on every call
/// - `catalog()` returns a slice so dispatch validation never clones schemas
/// - Implementations should build the catalog once in their constructor
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the backend name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of the surface
    fn description(&self) -> &str;

    /// The published invocation catalog
    fn catalog(&self) -> &[InvocationSpec];

    /// Execute a catalog invocation with the given parameters
    async fn invoke(
        &self,
        name: &str,
        parameters: Value,
    ) -> Result<InvocationOutcome, Box<dyn Error + Send + Sync>>;

    /// Whether this backend can capture visual snapshots
    fn supports_snapshots(&self) -> bool {
        false
    }

    /// Capture a visual snapshot of the given scope
    async fn capture_snapshot(
        &self,
        _scope: &str,
    ) -> Result<EvidenceRef, Box<dyn Error + Send + Sync>> {
        Err("snapshots not supported by this backend".into())
    }
}

/// Look up a catalog entry by invocation name
pub fn find_spec<'a>(catalog: &'a [InvocationSpec], name: &str) -> Option<&'a InvocationSpec> {
    catalog.iter().find(|spec| spec.name == name)
}
