//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the cache core and its external
//! collaborators: the shared key-value store and the edge purge endpoint.

use crate::Result;
use crate::ids::Timestamp;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// Hierarchical location in the backing store, rendered as `a/b/c`.
///
/// Segments are expected to be storage-safe already; no escaping happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Shared key-value store holding entries and tag records.
///
/// Values form a JSON tree addressed by [`StorePath`]. Reads of a single path
/// must observe the latest committed write to that path; nothing is promised
/// across paths.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the subtree at `path`.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Merge `fields` into the object at `path`, replacing only the named children.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()>;

    /// Replace the subtree at `path`.
    async fn set(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Delete the subtree at `path`. Deleting a missing path succeeds.
    async fn remove(&self, path: &StorePath) -> Result<()>;

    /// Atomically store `max(current, candidate)` at `path` and return it.
    ///
    /// A missing or non-numeric current value counts as absent.
    async fn fetch_max(&self, path: &StorePath, candidate: i64) -> Result<i64>;

    /// Current time on the store's own clock.
    ///
    /// Entry write times and tag watermarks are both taken from here, so
    /// processes sharing a store compare them on one timeline regardless of
    /// their local clocks.
    async fn now(&self) -> Result<Timestamp>;
}

/// Edge layer accepting out-of-band eviction requests.
#[async_trait]
pub trait PurgeSender: Send + Sync {
    /// Ask the edge to evict the response cached for `path`.
    async fn purge(&self, path: &str) -> Result<()>;
}
