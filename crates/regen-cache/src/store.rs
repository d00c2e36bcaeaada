//! Entry persistence for one build generation.

use crate::types::{DATA, EntryNode, Layout, Namespace, StoredPayload};
use regen_core::{
    BuildGeneration, CacheKey, CacheValue, Error, KeyValueStore, Result, StorePath, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A decoded entry read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value: CacheValue,
    pub last_modified: Timestamp,
}

/// Reads, writes and removes cache entries.
#[derive(Clone)]
pub struct ArtifactStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ArtifactStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Read the entry under `key`.
    ///
    /// A node that cannot be decoded yields [`Error::Corruption`].
    pub async fn get(
        &self,
        generation: &BuildGeneration,
        namespace: Namespace,
        key: &CacheKey,
    ) -> Result<Option<StoredEntry>> {
        let path = Layout::new(generation).entry(namespace, key);
        let Some(node) = self.kv.get(&path).await? else {
            return Ok(None);
        };
        // Tags recorded on a key whose payload is gone.
        if node.get(DATA).is_none() {
            return Ok(None);
        }

        match decode_entry(&path, node) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path, error = %e, "Discarding undecodable cache entry");
                Err(e)
            }
        }
    }

    /// Store `value` under `key` and return its write time.
    ///
    /// The entry is stamped with the store's clock. Only the payload fields
    /// are replaced; tags already recorded on the entry stay in place.
    pub async fn set(
        &self,
        generation: &BuildGeneration,
        key: &CacheKey,
        value: CacheValue,
    ) -> Result<Timestamp> {
        let path = Layout::new(generation).entry(Namespace::of(&value), key);
        let kind = value.kind();
        let data = serde_json::to_string(&StoredPayload::from(value))?;

        let at = self.kv.now().await?;
        self.kv
            .update(&path, EntryNode::write_fields(data, kind, at))
            .await?;
        debug!(path = %path, kind = %kind, at = %at, "Stored cache entry");
        Ok(at)
    }

    /// Delete the entry under `key` in both namespaces, tags included.
    pub async fn remove(&self, generation: &BuildGeneration, key: &CacheKey) -> Result<()> {
        let layout = Layout::new(generation);
        let render_path = layout.entry(Namespace::Render, key);
        let fetch_path = layout.entry(Namespace::Fetch, key);
        let (render, fetch) = futures::join!(
            self.kv.remove(&render_path),
            self.kv.remove(&fetch_path)
        );
        render?;
        fetch?;
        debug!(generation = %generation, key = %key, "Removed cache entry");
        Ok(())
    }
}

fn decode_entry(path: &StorePath, node: serde_json::Value) -> Result<StoredEntry> {
    let node: EntryNode = serde_json::from_value(node)
        .map_err(|e| Error::corruption(path.to_string(), e.to_string()))?;
    let payload: StoredPayload = serde_json::from_str(&node.data)
        .map_err(|e| Error::corruption(path.to_string(), e.to_string()))?;
    let value = CacheValue::from(payload);

    if value.kind() != node.kind {
        return Err(Error::corruption(
            path.to_string(),
            format!("kind {} does not match payload {}", node.kind, value.kind()),
        ));
    }

    Ok(StoredEntry {
        value,
        last_modified: node.last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regen_core::{Extra, FetchValue, Headers, ManualClock, RouteValue};
    use regen_kv::{FaultyStore, MemoryStore};
    use serde_json::{Value, json};

    fn route(body: &str) -> CacheValue {
        CacheValue::Route(RouteValue {
            body: body.to_string(),
            status: 200,
            headers: Headers::new(),
            extra: Extra::new(),
        })
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        kv: Arc<MemoryStore>,
        store: ArtifactStore,
        generation: BuildGeneration,
    }

    fn setup() -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(100)));
        let kv = Arc::new(MemoryStore::with_clock(clock.clone()));
        Fixture {
            clock,
            store: ArtifactStore::new(kv.clone()),
            kv,
            generation: BuildGeneration::new("build-1"),
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let Fixture {
            store, generation, ..
        } = setup();
        let key = CacheKey::new("/api/feed");

        let at = store.set(&generation, &key, route("[]")).await.unwrap();
        assert_eq!(at, Timestamp::from_millis(100));

        let entry = store
            .get(&generation, Namespace::Render, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value, route("[]"));
        assert_eq!(entry.last_modified, Timestamp::from_millis(100));
    }

    #[tokio::test]
    async fn test_write_time_comes_from_store() {
        let Fixture {
            clock,
            store,
            generation,
            ..
        } = setup();
        let key = CacheKey::new("/");

        clock.set(Timestamp::from_millis(7_000));
        store.set(&generation, &key, route("a")).await.unwrap();

        let entry = store
            .get(&generation, Namespace::Render, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.last_modified, Timestamp::from_millis(7_000));
    }

    #[tokio::test]
    async fn test_unreadable_store_clock_fails_write() {
        let kv = Arc::new(FaultyStore::new(MemoryStore::new()));
        let store = ArtifactStore::new(kv.clone());
        let generation = BuildGeneration::new("build-1");
        kv.fail_reads(true);

        assert!(
            store
                .set(&generation, &CacheKey::new("/"), route("a"))
                .await
                .is_err()
        );
        kv.fail_reads(false);
        assert_eq!(kv.inner().write_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_namespace_is_separate() {
        let Fixture {
            store, generation, ..
        } = setup();
        let key = CacheKey::new("abc123");
        let value = CacheValue::Fetch(FetchValue {
            data: json!({"ok": true}),
            revalidate: json!(60),
            tags: vec![],
            extra: Extra::new(),
        });

        store.set(&generation, &key, value).await.unwrap();

        assert!(
            store
                .get(&generation, Namespace::Render, &key)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .get(&generation, Namespace::Fetch, &key)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_overwrite_keeps_tags_child() {
        let Fixture {
            clock,
            kv,
            store,
            generation,
        } = setup();
        let key = CacheKey::new("/");
        let layout = Layout::new(&generation);

        store.set(&generation, &key, route("a")).await.unwrap();
        kv.set(
            &layout.entry_tags(Namespace::Render, &key),
            json!({"blog": "blog"}),
        )
        .await
        .unwrap();
        clock.advance(2);
        store.set(&generation, &key, route("b")).await.unwrap();

        let node = kv
            .get(&layout.entry(Namespace::Render, &key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node["tags"]["blog"], "blog");
        assert_eq!(node["lastModified"], 102);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_error() {
        let Fixture {
            kv,
            store,
            generation,
            ..
        } = setup();
        let key = CacheKey::new("/broken");
        let path = Layout::new(&generation).entry(Namespace::Render, &key);

        kv.set(
            &path,
            json!({"data": "{\"type\":\"image\"}", "kind": "PAGE", "lastModified": 5}),
        )
        .await
        .unwrap();

        let err = store
            .get(&generation, Namespace::Render, &key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_corruption() {
        let Fixture {
            kv,
            store,
            generation,
            ..
        } = setup();
        let key = CacheKey::new("/mismatch");
        let path = Layout::new(&generation).entry(Namespace::Render, &key);
        let data = serde_json::to_string(&StoredPayload::from(route("x"))).unwrap();

        kv.set(&path, json!({"data": data, "kind": "PAGE", "lastModified": 5}))
            .await
            .unwrap();

        assert!(matches!(
            store.get(&generation, Namespace::Render, &key).await,
            Err(Error::Corruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_tags_without_payload_is_absent() {
        let Fixture {
            kv,
            store,
            generation,
            ..
        } = setup();
        let key = CacheKey::new("/orphan");
        let layout = Layout::new(&generation);

        kv.set(
            &layout.entry_tags(Namespace::Render, &key),
            json!({"blog": "blog"}),
        )
        .await
        .unwrap();

        assert!(
            store
                .get(&generation, Namespace::Render, &key)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let Fixture {
            store, generation, ..
        } = setup();
        let key = CacheKey::new("/gone");

        store.remove(&generation, &key).await.unwrap();
        store.set(&generation, &key, route("x")).await.unwrap();
        store.remove(&generation, &key).await.unwrap();
        store.remove(&generation, &key).await.unwrap();

        assert!(
            store
                .get(&generation, Namespace::Render, &key)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_remove_clears_both_namespaces() {
        let Fixture {
            store, generation, ..
        } = setup();
        let key = CacheKey::new("shared");
        let fetched = CacheValue::Fetch(FetchValue {
            data: json!([1]),
            revalidate: Value::Null,
            tags: vec![],
            extra: Extra::new(),
        });

        store.set(&generation, &key, route("r")).await.unwrap();
        store.set(&generation, &key, fetched).await.unwrap();
        store.remove(&generation, &key).await.unwrap();

        for namespace in [Namespace::Render, Namespace::Fetch] {
            assert!(
                store
                    .get(&generation, namespace, &key)
                    .await
                    .unwrap()
                    .is_none()
            );
        }
    }
}
