//! Span creation for cache operations.

use tracing::{Level, Span, span};

/// Attributes shared by every cache span.
#[derive(Debug, Default, Clone)]
pub struct CacheAttributes {
    pub generation: Option<String>,
    pub key: Option<String>,
    pub kind: Option<String>,
    pub tag: Option<String>,
    pub fetch_cache: bool,
}

impl CacheAttributes {
    pub fn new(generation: impl Into<String>) -> Self {
        Self {
            generation: Some(generation.into()),
            ..Default::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn fetch_cache(mut self, fetch_cache: bool) -> Self {
        self.fetch_cache = fetch_cache;
        self
    }
}

/// Create a span for a cache read.
pub fn get_span(attrs: &CacheAttributes) -> Span {
    span!(
        Level::DEBUG,
        "cache.get",
        cache.generation = attrs.generation.as_deref().unwrap_or(""),
        cache.key = attrs.key.as_deref().unwrap_or(""),
        cache.fetch = attrs.fetch_cache,
    )
}

/// Create a span for a cache write or removal.
pub fn set_span(attrs: &CacheAttributes) -> Span {
    span!(
        Level::DEBUG,
        "cache.set",
        cache.generation = attrs.generation.as_deref().unwrap_or(""),
        cache.key = attrs.key.as_deref().unwrap_or(""),
        cache.kind = attrs.kind.as_deref().unwrap_or("none"),
    )
}

/// Create a span for a tag revalidation.
pub fn revalidate_span(attrs: &CacheAttributes) -> Span {
    span!(
        Level::INFO,
        "cache.revalidate",
        cache.generation = attrs.generation.as_deref().unwrap_or(""),
        cache.tag = attrs.tag.as_deref().unwrap_or(""),
    )
}

/// Create a span for one purge request.
pub fn purge_span(path: &str) -> Span {
    span!(Level::DEBUG, "edge.purge", edge.path = path)
}
