//! Booru-style JSON API adapter.
//!
//! Covers the family of sources that expose an e621-compatible
//! `posts.json` endpoint: tag query, page number, per-page limit, optional
//! HTTP basic auth. One `BooruAdapter` instance is configured per source.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::SourceConfig;

use super::types::{
    AdapterError, Descriptor, DescriptorPage, ResolvedMedia, SiteAdapter,
};

/// Configuration for one booru-backed source.
#[derive(Debug, Clone)]
pub struct BooruAdapterConfig {
    pub name: String,
    pub base_url: String,
    pub page_limit: u32,
    pub username: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl BooruAdapterConfig {
    /// Build adapter configuration from a configured source.
    pub fn from_source(source: &SourceConfig, timeout_secs: u64) -> Self {
        Self {
            name: source.name.clone(),
            base_url: source.base_url.trim_end_matches('/').to_string(),
            page_limit: source.page_limit,
            username: source.username.clone(),
            api_key: source.api_key.clone(),
            timeout_secs,
        }
    }
}

/// Booru JSON API adapter.
pub struct BooruAdapter {
    client: Client,
    config: BooruAdapterConfig,
}

impl BooruAdapter {
    pub fn new(config: BooruAdapterConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("magpie/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn build_search_url(&self, tags: &[String], page: u32) -> String {
        format!(
            "{}/posts.json?tags={}&page={}&limit={}",
            self.config.base_url,
            urlencoding::encode(&tags.join(" ")),
            page,
            self.config.page_limit
        )
    }

    async fn get_json(&self, url: &str) -> Result<PostsResponse, AdapterError> {
        let mut request = self.client.get(url);
        if let (Some(user), Some(key)) = (&self.config.username, &self.config.api_key) {
            request = request.basic_auth(user, Some(key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::Timeout
            } else if e.is_connect() {
                AdapterError::ConnectionFailed(e.to_string())
            } else {
                AdapterError::ApiError {
                    status: 0,
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::ApiError {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }

    fn descriptor_from_post(&self, post: BooruPost) -> Option<Descriptor> {
        // Posts hidden behind a login have no file URL; they cannot be
        // fetched and are dropped here rather than failing later.
        let media_url = Some(post.file.url.clone()?);
        let format = post.file.ext.to_lowercase();
        let filename = format!("{}.{}", post.id, format);

        Some(Descriptor {
            source: self.config.name.clone(),
            id: post.id.to_string(),
            tags: flatten_tags(&post.tags),
            filename,
            format,
            expected_bytes: post.file.size,
            media_url,
        })
    }
}

#[async_trait]
impl SiteAdapter for BooruAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn resolve_direct(&self, url: &str) -> Result<Descriptor, AdapterError> {
        let id = post_id_from_url(url).ok_or(AdapterError::NotFound)?;
        let api_url = format!("{}/posts/{}.json", self.config.base_url, id);

        let response = self.get_json(&api_url).await?;
        let post = response
            .into_posts()
            .into_iter()
            .next()
            .ok_or(AdapterError::NotFound)?;

        self.descriptor_from_post(post).ok_or(AdapterError::NotFound)
    }

    async fn search_page(
        &self,
        tags: &[String],
        page: u32,
    ) -> Result<DescriptorPage, AdapterError> {
        let url = self.build_search_url(tags, page);
        debug!(source = self.config.name, page, "Fetching search page");

        let response = self.get_json(&url).await?;

        // The backend refuses to paginate past a depth cap and answers
        // with a message instead of posts; treat that as the last page.
        if let Some(message) = response.message() {
            debug!(source = self.config.name, message, "Pagination stopped by source");
            return Ok(DescriptorPage {
                descriptors: Vec::new(),
                has_more: false,
            });
        }

        let posts = response.into_posts();
        let full_page = posts.len() as u32 >= self.config.page_limit;
        let descriptors: Vec<Descriptor> = posts
            .into_iter()
            .filter_map(|p| self.descriptor_from_post(p))
            .collect();

        Ok(DescriptorPage {
            descriptors,
            has_more: full_page,
        })
    }

    async fn resolve_media(
        &self,
        descriptor: &Descriptor,
    ) -> Result<ResolvedMedia, AdapterError> {
        match &descriptor.media_url {
            Some(url) => Ok(ResolvedMedia {
                url: url.clone(),
                filename: descriptor.filename.clone(),
            }),
            None => Err(AdapterError::Gone(descriptor.id.clone())),
        }
    }
}

/// Extract the numeric post id from a post page URL,
/// e.g. "https://e621.net/posts/12345" or ".../posts/12345.json".
fn post_id_from_url(url: &str) -> Option<u64> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    let digits = last.trim_end_matches(".json");
    digits.parse().ok()
}

/// Flatten grouped tags (general, species, character, artist, ...) into a
/// single lowercase list.
fn flatten_tags(groups: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    groups
        .values()
        .flatten()
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PostsResponse {
    /// e621-style envelope: `{"posts": [...]}` for searches,
    /// `{"post": {...}}` for single lookups.
    Wrapped {
        #[serde(default)]
        posts: Vec<BooruPost>,
        #[serde(default)]
        post: Option<BooruPost>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Some boorus answer with a bare array.
    Bare(Vec<BooruPost>),
}

impl PostsResponse {
    fn into_posts(self) -> Vec<BooruPost> {
        match self {
            PostsResponse::Wrapped { posts, post, .. } => {
                if let Some(single) = post {
                    vec![single]
                } else {
                    posts
                }
            }
            PostsResponse::Bare(posts) => posts,
        }
    }

    fn message(&self) -> Option<&str> {
        match self {
            PostsResponse::Wrapped { message, posts, post }
                if posts.is_empty() && post.is_none() =>
            {
                message.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BooruPost {
    id: u64,
    file: BooruFile,
    #[serde(default)]
    tags: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BooruFile {
    #[serde(default)]
    url: Option<String>,
    ext: String,
    #[serde(default)]
    size: Option<u64>,
}
