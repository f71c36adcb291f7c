//! Named configuration resolution
//!
//! Flow code often needs endpoint and credential settings that are managed
//! outside the flow itself. Rather than a globally reachable, dynamically
//! typed registry, resolution is an explicit capability: a resolver is
//! constructed at process start, handed to the flows that need it, and
//! returns payloads that deserialize into typed settings structs.

use async_trait::async_trait;

use crate::{CoreError, Payload};

/// Resolves a configuration payload by name
///
/// Supplied by an external collaborator; the in-memory implementation in
/// `windlass-state-inmemory` covers tests and local deployments.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    /// Resolve the named configuration; fails with `ConfigurationError`
    /// if the name is unknown
    async fn resolve(&self, name: &str) -> Result<Payload, CoreError>;
}

/// Resolve the named configuration and deserialize it into a typed struct
pub async fn resolve_as<T>(resolver: &dyn ConfigResolver, name: &str) -> Result<T, CoreError>
where
    T: serde::de::DeserializeOwned,
{
    let payload = resolver.resolve(name).await?;
    payload.to().map_err(|e| {
        CoreError::ConfigurationError(format!("config '{}' has unexpected shape: {}", name, e))
    })
}
