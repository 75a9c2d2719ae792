//! The expensive operation behind a cache miss

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;

use crawl_cache_core::{CacheKey, Category, OriginCache, Result};

/// What a fetch request names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// A locator; normalized before hashing
    Url(String),
    /// Raw content; hashed as-is
    Content(Bytes),
}

impl Identifier {
    pub fn url(url: impl Into<String>) -> Self {
        Identifier::Url(url.into())
    }

    pub fn content(bytes: impl Into<Bytes>) -> Self {
        Identifier::Content(bytes.into())
    }

    /// Lowercased host of a URL identifier
    pub fn host(&self) -> Option<String> {
        match self {
            Identifier::Url(raw) => url::Url::parse(raw.trim())
                .ok()
                .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase())),
            Identifier::Content(_) => None,
        }
    }
}

/// Input handed to a [`Fill`]
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub key: CacheKey,
    pub identifier: Identifier,
}

impl FillRequest {
    pub fn category(&self) -> Category {
        self.key.category
    }

    /// The URL to crawl, if the request was URL-located
    pub fn url(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Url(url) => Some(url),
            Identifier::Content(_) => None,
        }
    }
}

/// Result of a fill
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutput {
    pub payload: Bytes,
    /// What the crawled site's own caching did, if known
    pub origin_cache: OriginCache,
}

impl FillOutput {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            origin_cache: OriginCache::Unknown,
        }
    }

    pub fn origin_cache(mut self, origin_cache: OriginCache) -> Self {
        self.origin_cache = origin_cache;
        self
    }
}

/// Produces the value for a key nobody has cached yet
///
/// This is where fetching, rendering, screenshotting or OCR happens. The
/// router guarantees at most one concurrent call per key per process.
#[async_trait]
pub trait Fill: Send + Sync + 'static {
    async fn fill(&self, request: &FillRequest) -> Result<FillOutput>;
}

/// [`Fill`] backed by an async closure
pub struct FnFill<F>(F);

/// Wrap an async closure as a [`Fill`]
pub fn fill_fn<F, Fut>(f: F) -> FnFill<F>
where
    F: Fn(FillRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FillOutput>> + Send + 'static,
{
    FnFill(f)
}

#[async_trait]
impl<F, Fut> Fill for FnFill<F>
where
    F: Fn(FillRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FillOutput>> + Send + 'static,
{
    async fn fill(&self, request: &FillRequest) -> Result<FillOutput> {
        (self.0)(request.clone()).await
    }
}
