// SPDX-License-Identifier: MIT

use crate::backend::Backend;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared registry of execution backends, keyed by name
#[derive(Clone)]
pub struct BackendRegistry {
    backends: Arc<RwLock<HashMap<String, Arc<dyn Backend>>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, backend: Arc<dyn Backend>) {
        let mut backends = self.backends.write().await;
        backends.insert(backend.name().to_string(), backend);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        let backends = self.backends.read().await;
        backends.get(name).cloned()
    }

    /// Registered backend names, sorted for deterministic prompts
    pub async fn names(&self) -> Vec<String> {
        let backends = self.backends.read().await;
        let mut names: Vec<String> = backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// (name, description) pairs for the backend selector prompt
    pub async fn descriptions(&self) -> Vec<(String, String)> {
        let backends = self.backends.read().await;
        let mut pairs: Vec<(String, String)> = backends
            .values()
            .map(|b| (b.name().to_string(), b.description().to_string()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Any registered backend that can capture snapshots
    pub async fn snapshot_capable(&self) -> Option<Arc<dyn Backend>> {
        let backends = self.backends.read().await;
        backends
            .values()
            .find(|b| b.supports_snapshots())
            .cloned()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
