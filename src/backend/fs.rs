// SPDX-License-Identifier: MIT

//! File-storage backend
//!
//! Exposes sandboxed file operations as an invocation catalog. The
//! read-only invocations double as the data-path verification probes:
//! "does artifact X exist with the expected shape" is `stat_file` or
//! `read_file` against the artifact's path.

use crate::backend::{Backend, EvidenceRef, InvocationOutcome, InvocationSpec};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Absolute path of the file to write
    pub path: String,
    /// Full content to write
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathArgs {
    /// Absolute path to operate on
    pub path: String,
}

#[derive(Debug, Serialize)]
struct StatResult {
    path: String,
    exists: bool,
    is_file: bool,
    is_dir: bool,
    size: u64,
}

/// File-storage backend rooted at a sandbox directory
pub struct FsBackend {
    root: PathBuf,
    catalog: Vec<InvocationSpec>,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

impl FsBackend {
    /// Create a backend confined to `root`. Paths outside the root are
    /// rejected at invoke time.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let catalog = vec![
            InvocationSpec::new(
                "write_file",
                "Create or overwrite a file with the given content",
                schema_of::<WriteFileArgs>(),
            ),
            InvocationSpec::read_only(
                "read_file",
                "Read the full content of a file",
                schema_of::<PathArgs>(),
            ),
            InvocationSpec::read_only(
                "stat_file",
                "Report whether a path exists, its kind, and its size",
                schema_of::<PathArgs>(),
            ),
            InvocationSpec::read_only(
                "list_dir",
                "List the entries of a directory",
                schema_of::<PathArgs>(),
            ),
            InvocationSpec::new(
                "delete_file",
                "Delete a file",
                schema_of::<PathArgs>(),
            ),
        ];

        Self {
            root: root.into(),
            catalog,
        }
    }

    /// Reject relative paths and escapes from the sandbox root
    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        if !path.is_absolute() {
            return Err(format!("path '{}' is not absolute", raw));
        }
        // Lexical containment check; the sandbox is an operator
        // guardrail, not a security boundary.
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(format!("path '{}' contains parent-directory components", raw));
        }
        if !path.starts_with(&self.root) {
            return Err(format!(
                "path '{}' is outside the sandbox root '{}'",
                raw,
                self.root.display()
            ));
        }
        Ok(path.to_path_buf())
    }

    async fn write_file(&self, args: WriteFileArgs) -> InvocationOutcome {
        let path = match self.resolve(&args.path) {
            Ok(p) => p,
            Err(e) => return InvocationOutcome::failed(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return InvocationOutcome::failed(format!("create parent dirs: {}", e));
            }
        }

        match tokio::fs::write(&path, args.content.as_bytes()).await {
            Ok(()) => InvocationOutcome::ok_with_evidence(
                json!({"path": args.path, "bytes": args.content.len()}),
                EvidenceRef::artifact(args.path),
            ),
            Err(e) => InvocationOutcome::failed(format!("write '{}': {}", args.path, e)),
        }
    }

    async fn read_file(&self, args: PathArgs) -> InvocationOutcome {
        let path = match self.resolve(&args.path) {
            Ok(p) => p,
            Err(e) => return InvocationOutcome::failed(e),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => InvocationOutcome::ok_with_evidence(
                json!({"path": args.path, "content": content}),
                EvidenceRef::artifact(args.path),
            ),
            Err(e) => InvocationOutcome::failed(format!("read '{}': {}", args.path, e)),
        }
    }

    async fn stat_file(&self, args: PathArgs) -> InvocationOutcome {
        let path = match self.resolve(&args.path) {
            Ok(p) => p,
            Err(e) => return InvocationOutcome::failed(e),
        };

        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) => StatResult {
                path: args.path.clone(),
                exists: true,
                is_file: meta.is_file(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            },
            Err(_) => StatResult {
                path: args.path.clone(),
                exists: false,
                is_file: false,
                is_dir: false,
                size: 0,
            },
        };

        // A stat is evidence either way: absence is as informative as
        // presence for verification.
        InvocationOutcome::ok_with_evidence(
            serde_json::to_value(&result).unwrap_or(Value::Null),
            EvidenceRef::artifact(args.path),
        )
    }

    async fn list_dir(&self, args: PathArgs) -> InvocationOutcome {
        let path = match self.resolve(&args.path) {
            Ok(p) => p,
            Err(e) => return InvocationOutcome::failed(e),
        };

        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(d) => d,
            Err(e) => return InvocationOutcome::failed(format!("list '{}': {}", args.path, e)),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();

        InvocationOutcome::ok(json!({"path": args.path, "entries": entries}))
    }

    async fn delete_file(&self, args: PathArgs) -> InvocationOutcome {
        let path = match self.resolve(&args.path) {
            Ok(p) => p,
            Err(e) => return InvocationOutcome::failed(e),
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => InvocationOutcome::ok(json!({"path": args.path, "deleted": true})),
            Err(e) => InvocationOutcome::failed(format!("delete '{}': {}", args.path, e)),
        }
    }
}

#[async_trait]
impl Backend for FsBackend {
    fn name(&self) -> &str {
        "fs"
    }

    fn description(&self) -> &str {
        "File storage: create, read, inspect, list and delete files on the local filesystem"
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
            "write_file" => self.write_file(serde_json::from_value(parameters)?).await,
            "read_file" => self.read_file(serde_json::from_value(parameters)?).await,
            "stat_file" => self.stat_file(serde_json::from_value(parameters)?).await,
            "list_dir" => self.list_dir(serde_json::from_value(parameters)?).await,
            "delete_file" => self.delete_file(serde_json::from_value(parameters)?).await,
            other => return Err(format!("invocation '{}' not in fs catalog", other).into()),
        };
        Ok(outcome)
    }
}
