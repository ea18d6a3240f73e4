//! Registry mapping source names to adapter instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::SiteAdapter;

/// Registry of configured site adapters, keyed by source name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Register an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.get(source).cloned()
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.adapters.contains_key(source)
    }

    /// Names of all registered sources, sorted.
    pub fn source_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, Descriptor, DescriptorPage, ResolvedMedia};
    use async_trait::async_trait;

    struct NamedAdapter(&'static str);

    #[async_trait]
    impl SiteAdapter for NamedAdapter {
        fn name(&self) -> &str {
            self.0
        }

        async fn resolve_direct(&self, _url: &str) -> Result<Descriptor, AdapterError> {
            Err(AdapterError::NotFound)
        }

        async fn search_page(
            &self,
            _tags: &[String],
            _page: u32,
        ) -> Result<DescriptorPage, AdapterError> {
            Ok(DescriptorPage::default())
        }

        async fn resolve_media(
            &self,
            _descriptor: &Descriptor,
        ) -> Result<ResolvedMedia, AdapterError> {
            Err(AdapterError::Gone("test".to_string()))
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NamedAdapter("e621")));
        registry.register(Arc::new(NamedAdapter("rule34")));

        assert!(registry.has_source("e621"));
        assert!(!registry.has_source("gelbooru"));
        assert_eq!(registry.get("rule34").unwrap().name(), "rule34");
        assert_eq!(registry.source_names(), vec!["e621", "rule34"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NamedAdapter("e621")));
        registry.register(Arc::new(NamedAdapter("e621")));
        assert_eq!(registry.source_names().len(), 1);
    }
}
