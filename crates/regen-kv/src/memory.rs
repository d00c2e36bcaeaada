//! In-process hierarchical key-value store.
//!
//! Mirrors the semantics the cache expects from its shared backing store:
//! a JSON tree where empty objects and nulls do not exist, merge-updates only
//! touch named children, and `fetch_max` is a single atomic transaction.
//! The store's clock stands in for a server clock shared by every handle.

use async_trait::async_trait;
use regen_core::{Clock, KeyValueStore, Result, StorePath, SystemClock, Timestamp};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// Memory-backed store, safe to share between tasks.
#[derive(Debug)]
pub struct MemoryStore {
    root: RwLock<Value>,
    clock: Arc<dyn Clock>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose time comes from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            clock,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of mutating operations applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let root = self.root.read().await;
        Ok(lookup(&root, path.segments()).cloned())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!(%path, fields = fields.len(), "update");
        let mut root = self.root.write().await;
        let node = object_at(&mut root, path.segments());
        for (name, value) in fields {
            match normalize(value) {
                Some(value) => {
                    node.insert(name, value);
                }
                None => {
                    node.remove(&name);
                }
            }
        }
        prune_empty(as_object(&mut root), path.segments());
        Ok(())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!(%path, "set");
        let mut root = self.root.write().await;
        let Some((last, parents)) = path.segments().split_last() else {
            return Ok(());
        };
        match normalize(value) {
            Some(value) => {
                object_at(&mut root, parents).insert(last.clone(), value);
            }
            None => remove_at(as_object(&mut root), path.segments()),
        }
        prune_empty(as_object(&mut root), parents);
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!(%path, "remove");
        let mut root = self.root.write().await;
        remove_at(as_object(&mut root), path.segments());
        Ok(())
    }

    async fn fetch_max(&self, path: &StorePath, candidate: i64) -> Result<i64> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut root = self.root.write().await;
        let current = lookup(&root, path.segments()).and_then(Value::as_i64);
        let next = current.map_or(candidate, |current| current.max(candidate));
        trace!(%path, ?current, next, "fetch_max");

        if current != Some(next)
            && let Some((last, parents)) = path.segments().split_last()
        {
            object_at(&mut root, parents).insert(last.clone(), Value::from(next));
        }
        Ok(next)
    }

    async fn now(&self) -> Result<Timestamp> {
        Ok(self.clock.now())
    }
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Object at `segments`, creating (or overwriting scalars with) objects on the way.
fn object_at<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Map<String, Value> {
    let mut node = as_object(root);
    for segment in segments {
        node = as_object(node.entry(segment.clone()).or_insert(Value::Null));
    }
    node
}

/// Remove the node at `segments` and any ancestors left empty.
fn remove_at(node: &mut Map<String, Value>, segments: &[String]) {
    match segments {
        [] => {}
        [last] => {
            node.remove(last);
        }
        [first, rest @ ..] => {
            let emptied = match node.get_mut(first) {
                Some(Value::Object(child)) => {
                    remove_at(child, rest);
                    child.is_empty()
                }
                _ => false,
            };
            if emptied {
                node.remove(first);
            }
        }
    }
}

/// Drop empty objects along `segments`, deepest first.
fn prune_empty(node: &mut Map<String, Value>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let emptied = match node.get_mut(first) {
        Some(Value::Object(child)) => {
            prune_empty(child, rest);
            child.is_empty()
        }
        _ => false,
    };
    if emptied {
        node.remove(first);
    }
}

/// Strip nulls and empty objects; `None` when nothing remains.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(name, value)| normalize(value).map(|value| (name, value)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regen_core::ManualClock;
    use serde_json::json;

    fn path(raw: &str) -> StorePath {
        let mut segments = raw.split('/');
        let mut path = StorePath::root(segments.next().unwrap());
        for segment in segments {
            path = path.child(segment);
        }
        path
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get(&path("b1/missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_merges_children() {
        let store = MemoryStore::new();
        store
            .update(&path("b1/page"), fields(json!({"data": "a", "tags": {"x": "x"}})))
            .await
            .unwrap();
        store
            .update(&path("b1/page"), fields(json!({"data": "b", "lastModified": 5})))
            .await
            .unwrap();

        let node = store.get(&path("b1/page")).await.unwrap().unwrap();
        assert_eq!(node, json!({"data": "b", "lastModified": 5, "tags": {"x": "x"}}));
    }

    #[tokio::test]
    async fn test_set_replaces_subtree() {
        let store = MemoryStore::new();
        store.set(&path("b1/k"), json!({"a": 1, "b": 2})).await.unwrap();
        store.set(&path("b1/k"), json!({"c": 3})).await.unwrap();
        assert_eq!(store.get(&path("b1/k")).await.unwrap(), Some(json!({"c": 3})));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_prunes() {
        let store = MemoryStore::new();
        store.set(&path("b1/fetch/k"), json!({"data": "x"})).await.unwrap();

        store.remove(&path("b1/fetch/k")).await.unwrap();
        store.remove(&path("b1/fetch/k")).await.unwrap();
        store.remove(&path("nothing/here")).await.unwrap();

        assert_eq!(store.get(&path("b1/fetch/k")).await.unwrap(), None);
        assert_eq!(store.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn test_null_fields_delete() {
        let store = MemoryStore::new();
        store
            .update(&path("b1/k"), fields(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        store.update(&path("b1/k"), fields(json!({"a": null}))).await.unwrap();
        assert_eq!(store.get(&path("b1/k")).await.unwrap(), Some(json!({"b": 2})));

        store.update(&path("b1/k"), fields(json!({"b": null}))).await.unwrap();
        assert_eq!(store.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn test_fetch_max_is_monotonic() {
        let store = MemoryStore::new();
        let at = path("b1/tags/blog/revalidatedAt");

        assert_eq!(store.fetch_max(&at, 100).await.unwrap(), 100);
        assert_eq!(store.fetch_max(&at, 50).await.unwrap(), 100);
        assert_eq!(store.fetch_max(&at, 150).await.unwrap(), 150);
        assert_eq!(store.get(&at).await.unwrap(), Some(json!(150)));
    }

    #[tokio::test]
    async fn test_fetch_max_concurrent() {
        let store = Arc::new(MemoryStore::new());
        let at = path("b1/tags/t/revalidatedAt");

        let tasks: Vec<_> = (1..=64)
            .map(|i| {
                let store = store.clone();
                let at = at.clone();
                tokio::spawn(async move { store.fetch_max(&at, (i * 37) % 101).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let expected = (1..=64).map(|i| (i * 37) % 101).max().unwrap();
        assert_eq!(store.get(&at).await.unwrap(), Some(json!(expected)));
    }

    #[tokio::test]
    async fn test_now_follows_store_clock() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(100)));
        let store = MemoryStore::with_clock(clock.clone());
        assert_eq!(store.now().await.unwrap(), Timestamp::from_millis(100));

        clock.advance(5);
        assert_eq!(store.now().await.unwrap(), Timestamp::from_millis(105));
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStore::new();
        store.set(&path("b1/k"), json!(1)).await.unwrap();
        store.get(&path("b1/k")).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 1);
    }
}
