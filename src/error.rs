// SPDX-License-Identifier: MIT

//! Typed error handling for telic-rs
//!
//! This module provides the error type hierarchy using thiserror.
//! The taxonomy follows the engine's failure surface: planning-time
//! violations, graph invariant violations, oracle protocol violations,
//! execution and verification failures, and the terminal outcomes
//! (deadlock, abort, cancellation).

use thiserror::Error;

/// Top-level error type for telic-rs
#[derive(Debug, Error)]
pub enum TelicError {
    /// The oracle failed to produce a valid plan within the retry budget
    #[error("Planning failure: {0}")]
    Planning(String),

    /// Graph invariant violations
    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// Oracle protocol or transport errors
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// An invocation plan failed catalog/schema validation
    #[error("Invocation rejected: {0}")]
    InvocationRejected(String),

    /// Backend failure or timeout during execution
    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    /// An item's success criterion was not observably met
    #[error("Verification rejected: {0}")]
    VerificationRejected(String),

    /// No progress possible: remaining items can never run
    #[error("Deadlock: no progress possible, blocked items: {0:?}")]
    Deadlock(Vec<String>),

    /// The replanner decided the workflow cannot continue
    #[error("Workflow aborted: {0}")]
    Aborted(String),

    /// External cancellation between items
    #[error("Workflow cancelled")]
    Cancelled,

    /// Backend not found in the registry
    #[error("Backend '{name}' not found")]
    BackendNotFound { name: String },

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// Graph invariant violations
///
/// Ids are rendered as display strings here so the error type stays
/// independent of the engine types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two items share an id
    #[error("Duplicate item id: {0}")]
    DuplicateId(String),

    /// A dependency references an id not present in the graph
    #[error("Item {item} depends on unknown item {dependency}")]
    DanglingDependency { item: String, dependency: String },

    /// A dependency references the item itself or a later item
    #[error("Item {item} declares forward or self dependency on {dependency}")]
    ForwardDependency { item: String, dependency: String },

    /// A graph must contain at least one item
    #[error("Graph contains no items")]
    Empty,

    /// Insertion point does not exist
    #[error("Insertion point {0} not found in graph")]
    UnknownInsertionPoint(String),

    /// An id could not be parsed as a hierarchical tuple
    #[error("Malformed hierarchical id: '{0}'")]
    MalformedId(String),
}

/// Oracle-specific errors
#[derive(Debug, Error)]
pub enum OracleError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Response did not match the expected contract
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Round-trip exceeded its timeout
    #[error("Oracle call timed out after {0} seconds")]
    Timeout(u64),

    /// API errors from the provider
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },
}

impl TelicError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an execution failure
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailure(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// True for the terminal outcomes that propagate to the caller
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Aborted(_) | Self::Deadlock(_) | Self::Cancelled
        )
    }
}

impl OracleError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a protocol violation
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

// Allow conversion from &str for backward compatibility
impl From<&str> for TelicError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for TelicError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

// Convert from Box<dyn Error> at the backend/oracle trait seams
impl From<Box<dyn std::error::Error + Send + Sync>> for TelicError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}
