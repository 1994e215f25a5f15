//! Publisher adapter abstraction
//!
//! The publishing queue only ever calls `publish`; everything a platform
//! needs beyond the content (decrypted token, platform-side identity,
//! stored metadata like a page id) rides in [`PublishCredentials`].
//! Concrete adapters live in their own crates and are registered at
//! worker startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Platform;

pub mod mock;

/// Decrypted credential material handed to an adapter for one attempt
#[derive(Debug, Clone)]
pub struct PublishCredentials {
    pub access_token: String,
    pub platform_user_id: Option<String>,
    /// Connection metadata JSON (page id, derived long-lived token, ...)
    pub metadata: Option<String>,
}

/// What a platform reports back for a delivered post
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub remote_id: String,
    pub url: Option<String>,
}

/// One platform's delivery capability.
///
/// Adapters raise `PlatformError` on transport failure; the queue treats
/// that identically to an unsuccessful outcome for retry purposes.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(
        &self,
        credentials: &PublishCredentials,
        content: &str,
    ) -> Result<PublishOutcome>;
}

/// Adapter lookup used by the publishing queue
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    adapters: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.adapters.insert(publisher.platform(), publisher);
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn Publisher>> {
        self.adapters.get(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockPublisher;
    use super::*;

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(MockPublisher::succeeding(Platform::Twitter)));

        assert!(registry.get(Platform::Twitter).is_some());
        assert!(registry.get(Platform::Reddit).is_none());
        assert_eq!(registry.platforms(), vec![Platform::Twitter]);
    }

    #[test]
    fn test_registry_replaces_same_platform() {
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(MockPublisher::succeeding(Platform::Twitter)));
        registry.register(Arc::new(MockPublisher::succeeding(Platform::Twitter)));

        assert_eq!(registry.platforms().len(), 1);
    }
}
