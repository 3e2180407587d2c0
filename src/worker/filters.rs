//! Provider filter handles, one per toll registry event.

use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::chain::{ChainProvider, EventName, FilterHandle, ProviderResult};

/// Cache of provider-side filters keyed by event name.
///
/// Handles are created lazily on first use. When the provider reports a
/// handle as unknown the entry is dropped and the next `resolve` creates a
/// fresh one.
pub struct FilterRegistry {
    provider: Arc<dyn ChainProvider>,
    filters: FxHashMap<EventName, FilterHandle>,
}

impl FilterRegistry {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            filters: FxHashMap::default(),
        }
    }

    /// Cached handle for `event`, creating it on the provider if needed.
    pub async fn resolve(&mut self, event: EventName) -> ProviderResult<FilterHandle> {
        if let Some(handle) = self.filters.get(&event) {
            return Ok(handle.clone());
        }

        let handle = self.provider.create_filter(event).await?;
        info!("[FILTERS] Created {} filter ({:?})", event, handle.id);
        self.filters.insert(event, handle.clone());
        Ok(handle)
    }

    /// Resolve every event up front. Failures are logged and retried lazily.
    pub async fn resolve_all(&mut self) -> usize {
        let mut resolved = 0;
        for event in EventName::ALL {
            match self.resolve(event).await {
                Ok(_) => resolved += 1,
                Err(e) => warn!("[FILTERS] Could not create {} filter yet: {}", event, e),
            }
        }
        resolved
    }

    /// Forget the handle for `event`. The provider already lost it, so it is
    /// not uninstalled.
    pub fn invalidate(&mut self, event: EventName) -> Option<FilterHandle> {
        let removed = self.filters.remove(&event);
        if removed.is_some() {
            warn!("[FILTERS] {} filter expired, it will be recreated next tick", event);
        }
        removed
    }

    /// Forget every handle, e.g. after the provider became unreachable and
    /// its filters may be gone. Nothing is uninstalled.
    pub fn invalidate_all(&mut self) {
        if !self.filters.is_empty() {
            warn!(
                "[FILTERS] Dropping {} filter(s), they will be recreated next tick",
                self.filters.len()
            );
        }
        self.filters.clear();
    }

    pub fn contains(&self, event: EventName) -> bool {
        self.filters.contains_key(&event)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Uninstall every handle on the provider and clear the cache.
    pub async fn release_all(&mut self) {
        let handles: Vec<FilterHandle> = self.filters.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }

        let provider = &self.provider;
        let results = join_all(handles.iter().map(|h| provider.uninstall_filter(h))).await;

        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                warn!("[FILTERS] Failed to uninstall {} filter: {}", handle.event, e);
            }
        }
        info!("[FILTERS] Released {} filter(s)", handles.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::test_support::{Failure, ScriptedProvider};

    #[tokio::test]
    async fn test_resolve_caches_handle() {
        let provider = Arc::new(ScriptedProvider::new(100));
        let mut registry = FilterRegistry::new(provider.clone());

        let first = registry.resolve(EventName::TollPaid).await.unwrap();
        let second = registry.resolve(EventName::TollPaid).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.created(EventName::TollPaid), 1);
    }

    #[tokio::test]
    async fn test_invalidate_recreates_only_that_event() {
        let provider = Arc::new(ScriptedProvider::new(100));
        let mut registry = FilterRegistry::new(provider.clone());
        assert_eq!(registry.resolve_all().await, 3);

        assert!(registry.invalidate(EventName::TollPaid).is_some());
        assert!(!registry.contains(EventName::TollPaid));
        assert!(registry.contains(EventName::VehicleRegistered));

        let recreated = registry.resolve(EventName::TollPaid).await.unwrap();
        assert_eq!(provider.created(EventName::TollPaid), 2);
        assert_eq!(provider.created(EventName::VehicleRegistered), 1);
        assert_ne!(recreated.id, None);
    }

    #[tokio::test]
    async fn test_invalidate_all_recreates_every_event() {
        let provider = Arc::new(ScriptedProvider::new(100));
        let mut registry = FilterRegistry::new(provider.clone());
        registry.resolve_all().await;

        registry.invalidate_all();

        assert!(registry.is_empty());
        assert!(provider.uninstalled().is_empty());

        assert_eq!(registry.resolve_all().await, 3);
        for event in EventName::ALL {
            assert_eq!(provider.created(event), 2);
        }
    }

    #[tokio::test]
    async fn test_create_failure_is_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(100));
        provider.fail_create(EventName::VehicleBlacklisted, Failure::Other);
        let mut registry = FilterRegistry::new(provider.clone());

        assert_eq!(registry.resolve_all().await, 2);
        assert!(!registry.contains(EventName::VehicleBlacklisted));

        registry.resolve(EventName::VehicleBlacklisted).await.unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_release_all_uninstalls_everything() {
        let provider = Arc::new(ScriptedProvider::new(100));
        let mut registry = FilterRegistry::new(provider.clone());
        registry.resolve_all().await;

        registry.release_all().await;

        assert!(registry.is_empty());
        assert_eq!(provider.uninstalled().len(), 3);
    }
}
