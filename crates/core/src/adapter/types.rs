//! Types for the site adapter seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata identifying one fetchable media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Source this descriptor came from, e.g. "e621".
    pub source: String,
    /// Remote identifier within the source.
    pub id: String,
    /// Tags attached to the item, flattened across tag groups.
    pub tags: Vec<String>,
    /// Candidate filename (unsanitized; the engine sanitizes before
    /// touching the filesystem).
    pub filename: String,
    /// File format / extension, lowercase, e.g. "png".
    pub format: String,
    /// Expected size in bytes when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_bytes: Option<u64>,
    /// Direct media URL when the source provides it up front. Adapters
    /// that need a second round-trip leave this empty and resolve it in
    /// `resolve_media`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// One page of descriptors from a paginated query.
#[derive(Debug, Clone, Default)]
pub struct DescriptorPage {
    pub descriptors: Vec<Descriptor>,
    /// Whether the source may have another page after this one.
    pub has_more: bool,
}

/// The final fetchable location for a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub url: String,
    pub filename: String,
}

/// Errors that can occur during adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Item not found")]
    NotFound,

    #[error("Media gone: {0}")]
    Gone(String),

    #[error("Source connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Source API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse source response: {0}")]
    Parse(String),
}

/// Trait for media sources.
///
/// Pagination is pulled page-by-page by the engine, so a slow consumer
/// naturally stops the adapter from fetching further pages.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Source name used in jobs, output paths, and rate limiting.
    fn name(&self) -> &str;

    /// Resolve metadata for a direct item URL.
    async fn resolve_direct(&self, url: &str) -> Result<Descriptor, AdapterError>;

    /// Fetch one page of results for a tag query. Pages start at 1.
    async fn search_page(&self, tags: &[String], page: u32)
        -> Result<DescriptorPage, AdapterError>;

    /// Resolve a descriptor to its fetchable URL and filename.
    async fn resolve_media(&self, descriptor: &Descriptor)
        -> Result<ResolvedMedia, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = Descriptor {
            source: "e621".to_string(),
            id: "12345".to_string(),
            tags: vec!["canine".to_string(), "solo".to_string()],
            filename: "12345.png".to_string(),
            format: "png".to_string(),
            expected_bytes: Some(2048),
            media_url: Some("https://static.e621.net/data/12345.png".to_string()),
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: Descriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, "12345");
        assert_eq!(parsed.tags.len(), 2);
        assert_eq!(parsed.expected_bytes, Some(2048));
    }

    #[test]
    fn test_descriptor_optional_fields_skipped() {
        let descriptor = Descriptor {
            source: "rule34".to_string(),
            id: "1".to_string(),
            tags: vec![],
            filename: "1.jpg".to_string(),
            format: "jpg".to_string(),
            expected_bytes: None,
            media_url: None,
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(!json.contains("expected_bytes"));
        assert!(!json.contains("media_url"));
    }
}
