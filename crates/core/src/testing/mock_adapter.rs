//! Mock site adapter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::adapter::{
    AdapterError, Descriptor, DescriptorPage, ResolvedMedia, SiteAdapter,
};

/// A recorded search call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSearch {
    pub tags: Vec<String>,
    pub page: u32,
}

/// Mock implementation of the `SiteAdapter` trait.
///
/// Provides controllable behavior for testing:
/// - Scripted pages returned in order by `search_page`
/// - Scripted direct-URL resolutions
/// - One-shot error injection
/// - Recorded calls for assertions
pub struct MockAdapter {
    name: String,
    /// Pages returned by `search_page`, indexed by page number - 1.
    pages: Arc<RwLock<Vec<DescriptorPage>>>,
    /// Descriptors returned by `resolve_direct`, keyed by URL.
    direct: Arc<RwLock<HashMap<String, Descriptor>>>,
    /// If set, the next search or resolve fails with this error.
    next_error: Arc<RwLock<Option<AdapterError>>>,
    searches: Arc<RwLock<Vec<RecordedSearch>>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: Arc::new(RwLock::new(Vec::new())),
            direct: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            searches: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script the pages `search_page` serves.
    pub async fn set_pages(&self, pages: Vec<DescriptorPage>) {
        *self.pages.write().await = pages;
    }

    /// Script a single page holding these descriptors.
    pub async fn set_descriptors(&self, descriptors: Vec<Descriptor>) {
        self.set_pages(vec![DescriptorPage {
            descriptors,
            has_more: false,
        }])
        .await;
    }

    /// Script a `resolve_direct` answer.
    pub async fn set_direct(&self, url: &str, descriptor: Descriptor) {
        self.direct
            .write()
            .await
            .insert(url.to_string(), descriptor);
    }

    /// Make the next adapter call fail with this error.
    pub async fn set_next_error(&self, error: AdapterError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn recorded_searches(&self) -> Vec<RecordedSearch> {
        self.searches.read().await.clone()
    }

    pub async fn search_count(&self) -> usize {
        self.searches.read().await.len()
    }

    async fn take_error(&self) -> Option<AdapterError> {
        self.next_error.write().await.take()
    }
}

#[async_trait]
impl SiteAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_direct(&self, url: &str) -> Result<Descriptor, AdapterError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        self.direct
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or(AdapterError::NotFound)
    }

    async fn search_page(
        &self,
        tags: &[String],
        page: u32,
    ) -> Result<DescriptorPage, AdapterError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.searches.write().await.push(RecordedSearch {
            tags: tags.to_vec(),
            page,
        });

        let pages = self.pages.read().await;
        Ok(pages
            .get(page.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or(DescriptorPage {
                descriptors: Vec::new(),
                has_more: false,
            }))
    }

    async fn resolve_media(
        &self,
        descriptor: &Descriptor,
    ) -> Result<ResolvedMedia, AdapterError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        match &descriptor.media_url {
            Some(url) => Ok(ResolvedMedia {
                url: url.clone(),
                filename: descriptor.filename.clone(),
            }),
            None => Err(AdapterError::Gone(descriptor.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_scripted_pages() {
        let adapter = MockAdapter::new("mock");
        adapter
            .set_pages(vec![
                DescriptorPage {
                    descriptors: vec![fixtures::descriptor("mock", "1", "png", &[])],
                    has_more: true,
                },
                DescriptorPage {
                    descriptors: vec![fixtures::descriptor("mock", "2", "png", &[])],
                    has_more: false,
                },
            ])
            .await;

        let first = adapter.search_page(&[], 1).await.unwrap();
        assert_eq!(first.descriptors[0].id, "1");
        assert!(first.has_more);

        let second = adapter.search_page(&[], 2).await.unwrap();
        assert_eq!(second.descriptors[0].id, "2");
        assert!(!second.has_more);

        // Off-script pages are empty and final.
        let third = adapter.search_page(&[], 3).await.unwrap();
        assert!(third.descriptors.is_empty());
        assert!(!third.has_more);

        assert_eq!(adapter.search_count().await, 3);
    }

    #[tokio::test]
    async fn test_error_injection_is_one_shot() {
        let adapter = MockAdapter::new("mock");
        adapter.set_next_error(AdapterError::Timeout).await;

        assert!(adapter.search_page(&[], 1).await.is_err());
        assert!(adapter.search_page(&[], 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_direct() {
        let adapter = MockAdapter::new("mock");
        adapter
            .set_direct(
                "http://x/posts/5",
                fixtures::descriptor("mock", "5", "jpg", &[]),
            )
            .await;

        let descriptor = adapter.resolve_direct("http://x/posts/5").await.unwrap();
        assert_eq!(descriptor.id, "5");

        let missing = adapter.resolve_direct("http://x/posts/6").await;
        assert!(matches!(missing, Err(AdapterError::NotFound)));
    }
}
