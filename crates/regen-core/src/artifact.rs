//! Artifact envelopes exchanged with the rendering host.
//!
//! The host hands the cache one of four kinds of generated output. Each kind
//! is a closed variant of [`CacheValue`]; fields the cache does not interpret
//! are carried through verbatim.

use crate::ids::{TagName, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Response headers as the host supplied them.
pub type Headers = BTreeMap<String, String>;

/// Envelope fields the cache does not interpret, kept as the host sent them.
pub type Extra = Map<String, Value>;

/// Header the renderer uses to announce the tags a page depends on.
pub const DEFAULT_CACHE_TAGS_HEADER: &str = "x-next-cache-tags";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactKind {
    Route,
    Page,
    Fetch,
    Redirect,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Route => "ROUTE",
            ArtifactKind::Page => "PAGE",
            ArtifactKind::Fetch => "FETCH",
            ArtifactKind::Redirect => "REDIRECT",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached artifact as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum CacheValue {
    Route(RouteValue),
    Page(PageValue),
    Fetch(FetchValue),
    Redirect(RedirectValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteValue {
    pub body: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageValue {
    pub html: String,
    pub page_data: PageData,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Page payload in one of the two rendering modes.
///
/// Host-side JSON cannot tell a structured payload holding a bare string
/// apart from a flight payload, so the untagged form prefers `Flight`. The
/// stored representation keeps an explicit discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageData {
    /// Serialized component stream produced by the app renderer.
    Flight(String),
    /// Props JSON produced by the pages renderer.
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchValue {
    pub data: Value,
    /// Revalidation interval in seconds, or `false` for never.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub revalidate: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectValue {
    pub props: Value,
    #[serde(flatten)]
    pub extra: Extra,
}

impl CacheValue {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            CacheValue::Route(_) => ArtifactKind::Route,
            CacheValue::Page(_) => ArtifactKind::Page,
            CacheValue::Fetch(_) => ArtifactKind::Fetch,
            CacheValue::Redirect(_) => ArtifactKind::Redirect,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, CacheValue::Fetch(_))
    }

    /// Tags this value depends on.
    ///
    /// Pages and routes announce tags through `tags_header` as a comma
    /// separated list. Fetch results carry the tags of the originating request
    /// in the call context and in their own payload. Redirects have none.
    pub fn derived_tags(&self, ctx: &SetContext, tags_header: &str) -> Vec<TagName> {
        let raw: Vec<&str> = match self {
            CacheValue::Page(page) => split_tag_header(&page.headers, tags_header),
            CacheValue::Route(route) => split_tag_header(&route.headers, tags_header),
            CacheValue::Fetch(fetch) => ctx
                .tags
                .iter()
                .chain(fetch.tags.iter())
                .map(String::as_str)
                .collect(),
            CacheValue::Redirect(_) => Vec::new(),
        };

        let mut tags: Vec<TagName> = Vec::with_capacity(raw.len());
        for tag in raw.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
            if !tags.iter().any(|existing| existing.as_str() == tag) {
                tags.push(TagName::new(tag));
            }
        }
        tags
    }
}

fn split_tag_header<'a>(headers: &'a Headers, name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.split(',').collect())
        .unwrap_or_default()
}

/// Per-call context of a host `set`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetContext {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SetContext {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Options of a host `get`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOptions {
    /// Read from the fetch-result namespace instead of the render namespace.
    #[serde(default)]
    pub fetch_cache: bool,
}

impl GetOptions {
    pub fn fetch() -> Self {
        Self { fetch_cache: true }
    }
}

/// A fresh cache entry returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHit {
    pub last_modified: Timestamp,
    pub value: CacheValue,
}
