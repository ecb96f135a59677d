// SPDX-License-Identifier: MIT

//! telic-rs - adaptive task decomposition and execution engine
//!
//! Turns one natural-language request into a dependency-ordered graph
//! of atomic actions, dispatches each action against an execution
//! backend, verifies the observable outcome, and repairs the plan on
//! failure without breaking graph ordering invariants.
//!
//! Layers:
//! - [oracle] - the external reasoning service seam, with strict
//!   response validation and bounded retry
//! - [backend] - execution surfaces publishing invocation catalogs
//! - [engine] - the orchestration core: graph, planner, selector,
//!   action planner, dispatcher, verifier, replanner, coordinator,
//!   summarizer
//! - [server] - HTTP surface over the engine

pub mod backend;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod server;

pub use engine::Engine;
pub use error::TelicError;
