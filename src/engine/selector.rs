// SPDX-License-Identifier: MIT

//! Backend Selector
//!
//! One oracle call choosing 1-2 backends for an item. Low confidence
//! never guesses: it falls back deterministically to the most general
//! backend (command execution) and records the low confidence in the
//! item trace.

use crate::backend::registry::BackendRegistry;
use crate::engine::types::{SelectedBackends, TodoItem};
use crate::oracle::protocol::BackendSelection;
use crate::oracle::{OracleClient, OracleRequest};
use crate::error::TelicError;
use serde_json::json;

/// The deterministic fallback: command execution can approximate most
/// actions, badly but predictably.
pub const FALLBACK_BACKEND: &str = "shell";

pub struct BackendSelector<'a> {
    oracle: &'a OracleClient,
    registry: &'a BackendRegistry,
    confidence_threshold: u8,
}

impl<'a> BackendSelector<'a> {
    pub fn new(
        oracle: &'a OracleClient,
        registry: &'a BackendRegistry,
        confidence_threshold: u8,
    ) -> Self {
        Self {
            oracle,
            registry,
            confidence_threshold,
        }
    }

    /// Choose 1-2 backends for the item
    pub async fn select(&self, item: &TodoItem) -> Result<SelectedBackends, TelicError> {
        let descriptions = self.registry.descriptions().await;
        if descriptions.is_empty() {
            return Err(TelicError::config("no backends registered"));
        }

        let catalog_lines: Vec<String> = descriptions
            .iter()
            .map(|(name, description)| format!("- {}: {}", name, description))
            .collect();

        let task = format!(
            "Choose the best execution backend(s) for this action.\n\n\
             Action: {}\nSuccess criterion: {}\n\n\
             Available backends:\n{}\n\n\
             Respond with exactly one JSON object matching the BackendSelection contract:\n\
             {{\"backends\": [\"name\"], \"confidence\": 0-100, \"reasoning\": \"...\"}}\n\
             Pick one backend, or two if the action genuinely spans two surfaces.",
            item.action,
            item.success_criterion,
            catalog_lines.join("\n")
        );

        let selection: BackendSelection = match self
            .oracle
            .ask(&OracleRequest::new(task, json!({"item_id": item.id})))
            .await
        {
            Ok(selection) => selection,
            Err(e) => {
                // A broken selection round-trip is not fatal: the
                // deterministic default keeps the workflow moving.
                log::warn!(
                    "Backend selection failed for item {} ({}), using fallback",
                    item.id,
                    e
                );
                return Ok(self.fallback(0));
            }
        };

        let known: Vec<String> = descriptions.iter().map(|(name, _)| name.clone()).collect();
        let valid = !selection.backends.is_empty()
            && selection.backends.len() <= 2
            && selection.backends.iter().all(|name| known.contains(name));

        if !valid {
            log::warn!(
                "Backend selection for item {} named unknown or too many backends {:?}, using fallback",
                item.id,
                selection.backends
            );
            return Ok(self.fallback(selection.confidence.min(100)));
        }

        if selection.confidence < self.confidence_threshold {
            log::info!(
                "Backend selection confidence {} below threshold {} for item {}, using fallback",
                selection.confidence,
                self.confidence_threshold,
                item.id
            );
            return Ok(self.fallback(selection.confidence));
        }

        Ok(SelectedBackends {
            names: selection.backends,
            confidence: selection.confidence.min(100),
            defaulted: false,
        })
    }

    fn fallback(&self, confidence: u8) -> SelectedBackends {
        SelectedBackends {
            names: vec![FALLBACK_BACKEND.to_string()],
            confidence,
            defaulted: true,
        }
    }
}
