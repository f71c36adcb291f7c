//! In-memory configuration resolver

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use windlass_core::{ConfigResolver, CoreError, Payload};

/// Configuration resolver backed by a registered set of named payloads
///
/// Settings are registered once at process start and resolved by name from
/// flow code, replacing any globally reachable configuration registry.
#[derive(Clone, Default)]
pub struct InMemoryConfigResolver {
    entries: Arc<RwLock<HashMap<String, Payload>>>,
}

impl InMemoryConfigResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named configuration payload, replacing any previous one
    pub async fn register(&self, name: impl Into<String>, payload: Payload) {
        let mut entries = self.entries.write().await;
        entries.insert(name.into(), payload);
    }

    /// Register a named configuration from a serializable settings struct
    pub async fn register_typed<T: serde::Serialize>(
        &self,
        name: impl Into<String>,
        settings: &T,
    ) -> Result<(), CoreError> {
        let payload = Payload::from(settings)?;
        self.register(name, payload).await;
        Ok(())
    }
}

#[async_trait]
impl ConfigResolver for InMemoryConfigResolver {
    async fn resolve(&self, name: &str) -> Result<Payload, CoreError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ConfigurationError(format!("unknown config: {}", name)))
    }
}
