//! Stored layout of entries and tag records.
//!
//! ```text
//! <generation>/<key>               render artifacts
//! <generation>/fetch/<key>         fetch results
//! <generation>/tags/<tag>          { revalidatedAt, paths: { <key>: true } }
//! ```
//!
//! Every segment below the generation goes through [`encode_key`].

use crate::keys::{decode_key, encode_key};
use regen_core::{
    ArtifactKind, BuildGeneration, CacheKey, CacheValue, Extra, FetchValue, GetOptions, Headers,
    PageData, PageValue, RedirectValue, RouteValue, StorePath, TagName, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const DATA: &str = "data";
pub(crate) const KIND: &str = "kind";
pub(crate) const LAST_MODIFIED: &str = "lastModified";
pub(crate) const TAGS: &str = "tags";
pub(crate) const REVALIDATED_AT: &str = "revalidatedAt";
pub(crate) const PATHS: &str = "paths";
const TAG_NAME: &str = "name";
const TAG_PENDING: &str = "pending";

const FETCH_SEGMENT: &str = "fetch";
const TAGS_SEGMENT: &str = "tags";

/// Which half of a generation an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Pages, routes and redirects, keyed by URL path.
    Render,
    /// Fetch results, keyed by request hash.
    Fetch,
}

impl Namespace {
    pub fn of(value: &CacheValue) -> Self {
        if value.is_fetch() {
            Namespace::Fetch
        } else {
            Namespace::Render
        }
    }

    pub fn for_options(options: GetOptions) -> Self {
        if options.fetch_cache {
            Namespace::Fetch
        } else {
            Namespace::Render
        }
    }
}

/// Path builder for one generation.
#[derive(Debug, Clone)]
pub struct Layout {
    root: StorePath,
}

impl Layout {
    pub fn new(generation: &BuildGeneration) -> Self {
        Self {
            root: StorePath::root(encode_key(generation.as_str())),
        }
    }

    pub fn entry(&self, namespace: Namespace, key: &CacheKey) -> StorePath {
        match namespace {
            Namespace::Render => self.root.child(encode_key(key.as_str())),
            Namespace::Fetch => self
                .root
                .child(FETCH_SEGMENT)
                .child(encode_key(key.as_str())),
        }
    }

    pub fn entry_tags(&self, namespace: Namespace, key: &CacheKey) -> StorePath {
        self.entry(namespace, key).child(TAGS)
    }

    pub fn tag(&self, tag: &TagName) -> StorePath {
        self.root.child(TAGS_SEGMENT).child(encode_key(tag.as_str()))
    }

    pub fn tag_watermark(&self, tag: &TagName) -> StorePath {
        self.tag(tag).child(REVALIDATED_AT)
    }

    pub fn tag_paths(&self, tag: &TagName) -> StorePath {
        self.tag(tag).child(PATHS)
    }
}

/// Response status and headers kept alongside page and route bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Headers,
}

/// Serialized artifact as held in an entry's `data` field.
///
/// `page` and `app` split the two page rendering modes so the page payload
/// decodes back to the variant it was written as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoredPayload {
    Route {
        body: String,
        meta: ResponseMeta,
        #[serde(default, skip_serializing_if = "Extra::is_empty")]
        extra: Extra,
    },
    Page {
        html: String,
        json: Value,
        meta: ResponseMeta,
        #[serde(default, skip_serializing_if = "Extra::is_empty")]
        extra: Extra,
    },
    App {
        html: String,
        rsc: String,
        meta: ResponseMeta,
        #[serde(default, skip_serializing_if = "Extra::is_empty")]
        extra: Extra,
    },
    Redirect {
        props: Value,
        #[serde(default, skip_serializing_if = "Extra::is_empty")]
        extra: Extra,
    },
    Fetch {
        data: Value,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        revalidate: Value,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Extra::is_empty")]
        extra: Extra,
    },
}

impl From<CacheValue> for StoredPayload {
    fn from(value: CacheValue) -> Self {
        match value {
            CacheValue::Route(route) => StoredPayload::Route {
                body: route.body,
                meta: ResponseMeta {
                    status: Some(route.status),
                    headers: route.headers,
                },
                extra: route.extra,
            },
            CacheValue::Page(page) => {
                let meta = ResponseMeta {
                    status: page.status,
                    headers: page.headers,
                };
                match page.page_data {
                    PageData::Structured(json) => StoredPayload::Page {
                        html: page.html,
                        json,
                        meta,
                        extra: page.extra,
                    },
                    PageData::Flight(rsc) => StoredPayload::App {
                        html: page.html,
                        rsc,
                        meta,
                        extra: page.extra,
                    },
                }
            }
            CacheValue::Fetch(fetch) => StoredPayload::Fetch {
                data: fetch.data,
                revalidate: fetch.revalidate,
                tags: fetch.tags,
                extra: fetch.extra,
            },
            CacheValue::Redirect(redirect) => StoredPayload::Redirect {
                props: redirect.props,
                extra: redirect.extra,
            },
        }
    }
}

impl From<StoredPayload> for CacheValue {
    fn from(payload: StoredPayload) -> Self {
        match payload {
            StoredPayload::Route { body, meta, extra } => CacheValue::Route(RouteValue {
                body,
                status: meta.status.unwrap_or(200),
                headers: meta.headers,
                extra,
            }),
            StoredPayload::Page {
                html,
                json,
                meta,
                extra,
            } => CacheValue::Page(PageValue {
                html,
                page_data: PageData::Structured(json),
                status: meta.status,
                headers: meta.headers,
                extra,
            }),
            StoredPayload::App {
                html,
                rsc,
                meta,
                extra,
            } => CacheValue::Page(PageValue {
                html,
                page_data: PageData::Flight(rsc),
                status: meta.status,
                headers: meta.headers,
                extra,
            }),
            StoredPayload::Redirect { props, extra } => {
                CacheValue::Redirect(RedirectValue { props, extra })
            }
            StoredPayload::Fetch {
                data,
                revalidate,
                tags,
                extra,
            } => CacheValue::Fetch(FetchValue {
                data,
                revalidate,
                tags,
                extra,
            }),
        }
    }
}

/// Entry node as read back from the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryNode {
    pub data: String,
    pub kind: ArtifactKind,
    pub last_modified: Timestamp,
    /// Encoded tag -> raw tag name.
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
}

impl EntryNode {
    /// Fields written on every store; the `tags` child is left untouched.
    pub fn write_fields(data: String, kind: ArtifactKind, at: Timestamp) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(DATA.to_string(), Value::String(data));
        fields.insert(KIND.to_string(), Value::String(kind.as_str().to_string()));
        fields.insert(LAST_MODIFIED.to_string(), Value::from(at.as_millis()));
        fields
    }
}

/// A tag recorded on an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTag {
    pub name: TagName,
    /// The key is not yet in this tag's reverse index.
    pub pending: bool,
}

impl RecordedTag {
    /// Value stored under the tag's child of the entry's `tags` node.
    ///
    /// Settled tags hold the raw name; a pending one holds
    /// `{ name, pending: true }` until a later write indexes it.
    pub fn to_value(&self) -> Value {
        if !self.pending {
            return Value::String(self.name.to_string());
        }
        let mut node = Map::new();
        node.insert(TAG_NAME.to_string(), Value::String(self.name.to_string()));
        node.insert(TAG_PENDING.to_string(), Value::Bool(true));
        Value::Object(node)
    }
}

/// Tags recorded in an entry's `tags` child.
///
/// Values written by this crate carry the raw name; anything else falls back
/// to decoding the child key.
pub fn recorded_tags<'a>(
    tags: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Vec<RecordedTag> {
    tags.into_iter()
        .map(|(encoded, raw)| match raw {
            Value::String(raw) => RecordedTag {
                name: TagName::new(raw.clone()),
                pending: false,
            },
            Value::Object(node) => RecordedTag {
                name: match node.get(TAG_NAME) {
                    Some(Value::String(raw)) => TagName::new(raw.clone()),
                    _ => TagName::new(decode_key(encoded)),
                },
                pending: node.get(TAG_PENDING).and_then(Value::as_bool) == Some(true),
            },
            _ => RecordedTag {
                name: TagName::new(decode_key(encoded)),
                pending: false,
            },
        })
        .collect()
}

/// A tag's watermark and reverse index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub revalidated_at: Option<Timestamp>,
    pub associated_keys: BTreeSet<CacheKey>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TagNode {
    #[serde(default)]
    pub revalidated_at: Option<Timestamp>,
    #[serde(default)]
    pub paths: BTreeMap<String, Value>,
}

impl From<TagNode> for TagRecord {
    fn from(node: TagNode) -> Self {
        Self {
            revalidated_at: node.revalidated_at,
            associated_keys: node
                .paths
                .keys()
                .map(|encoded| CacheKey::new(decode_key(encoded)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new(&BuildGeneration::new("build-1"));
        let key = CacheKey::new("/blog/post-1");

        assert_eq!(
            layout.entry(Namespace::Render, &key).to_string(),
            "build-1/%2Fblog%2Fpost-1"
        );
        assert_eq!(
            layout.entry(Namespace::Fetch, &CacheKey::new("abc123")).to_string(),
            "build-1/fetch/abc123"
        );
        assert_eq!(
            layout.tag_paths(&TagName::new("blog.posts")).to_string(),
            "build-1/tags/blog%2Eposts/paths"
        );
    }

    #[test]
    fn test_page_modes_keep_discriminator() {
        let structured = CacheValue::Page(PageValue {
            html: "<h1/>".to_string(),
            page_data: PageData::Structured(json!("just a string")),
            status: Some(200),
            headers: Headers::new(),
            extra: Extra::new(),
        });

        let stored = StoredPayload::from(structured.clone());
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["type"], "page");

        let parsed: StoredPayload = serde_json::from_value(json).unwrap();
        assert_eq!(CacheValue::from(parsed), structured);
    }

    #[test]
    fn test_unknown_type_fails() {
        assert!(serde_json::from_value::<StoredPayload>(json!({"type": "image"})).is_err());
    }

    #[test]
    fn test_stored_payload_keeps_extra_fields() {
        let value: CacheValue = serde_json::from_value(json!({
            "kind": "PAGE",
            "html": "<h1/>",
            "pageData": "0:[]",
            "postponed": "p",
        }))
        .unwrap();

        let stored = serde_json::to_value(StoredPayload::from(value.clone())).unwrap();
        assert_eq!(stored["extra"]["postponed"], "p");

        let parsed: StoredPayload = serde_json::from_value(stored).unwrap();
        assert_eq!(CacheValue::from(parsed), value);
    }

    #[test]
    fn test_recorded_tags_fallback() {
        let tags = json!({
            "blog": "blog",
            "a%2Eb": true,
            "news": {"name": "news", "pending": true},
        });
        let mut recorded = recorded_tags(tags.as_object().unwrap());
        recorded.sort_by(|a, b| a.name.cmp(&b.name));
        let summary: Vec<(&str, bool)> = recorded
            .iter()
            .map(|tag| (tag.name.as_str(), tag.pending))
            .collect();
        assert_eq!(summary, vec![("a.b", false), ("blog", false), ("news", true)]);
    }

    #[test]
    fn test_recorded_tag_values() {
        let settled = RecordedTag {
            name: TagName::new("blog"),
            pending: false,
        };
        assert_eq!(settled.to_value(), json!("blog"));

        let pending = RecordedTag {
            pending: true,
            ..settled
        };
        assert_eq!(pending.to_value(), json!({"name": "blog", "pending": true}));
    }

    #[test]
    fn test_tag_record_from_node() {
        let node: TagNode = serde_json::from_value(json!({
            "revalidatedAt": 150,
            "paths": {"%2Fblog%2Fpost-1": true}
        }))
        .unwrap();
        let record = TagRecord::from(node);
        assert_eq!(record.revalidated_at, Some(Timestamp::from_millis(150)));
        assert!(record.associated_keys.contains(&CacheKey::new("/blog/post-1")));
    }
}
