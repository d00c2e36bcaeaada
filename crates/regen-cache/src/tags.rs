//! Tag associations, watermarks and the tag-to-key reverse index.

use crate::keys::encode_key;
use crate::staleness::WatermarkLookup;
use crate::types::{Layout, Namespace, RecordedTag, TagNode, TagRecord, recorded_tags};
use async_trait::async_trait;
use futures::future::join_all;
use regen_core::{BuildGeneration, CacheKey, Error, KeyValueStore, Result, TagName, Timestamp};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tag bookkeeping on top of the shared store.
#[derive(Clone)]
pub struct TagIndex {
    kv: Arc<dyn KeyValueStore>,
}

impl TagIndex {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Record `tags` on the entry under `key`.
    ///
    /// Render keys are also added to each tag's reverse index so they can be
    /// purged later. Reverse-index writes run concurrently and a failed one is
    /// logged and its tag recorded as pending, so the next write of the key
    /// retries it. The entry's own tag list must be written for the call to
    /// succeed. Returns how many reverse-index writes landed.
    pub async fn associate(
        &self,
        generation: &BuildGeneration,
        namespace: Namespace,
        key: &CacheKey,
        tags: &[TagName],
    ) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let layout = Layout::new(generation);

        let mut unindexed: Vec<&TagName> = Vec::new();
        if namespace == Namespace::Render {
            let encoded_key = encode_key(key.as_str());
            let writes = tags.iter().map(|tag| {
                let mut paths = Map::new();
                paths.insert(encoded_key.clone(), Value::Bool(true));
                let path = layout.tag_paths(tag);
                async move { (tag, self.kv.update(&path, paths).await) }
            });

            for (tag, result) in join_all(writes).await {
                if let Err(e) = result {
                    warn!(tag = %tag, key = %key, error = %e, "Failed to index key under tag");
                    unindexed.push(tag);
                }
            }
        }

        let fields: Map<String, Value> = tags
            .iter()
            .map(|tag| {
                let recorded = RecordedTag {
                    name: tag.clone(),
                    pending: unindexed.contains(&tag),
                };
                (encode_key(tag.as_str()), recorded.to_value())
            })
            .collect();
        self.kv
            .update(&layout.entry_tags(namespace, key), fields)
            .await?;

        let indexed = match namespace {
            Namespace::Render => tags.len() - unindexed.len(),
            Namespace::Fetch => 0,
        };
        debug!(key = %key, tags = tags.len(), indexed, "Associated tags");
        Ok(indexed)
    }

    /// Tag names recorded on the entry under `key`.
    pub async fn get_tags(
        &self,
        generation: &BuildGeneration,
        namespace: Namespace,
        key: &CacheKey,
    ) -> Result<Vec<TagName>> {
        Ok(self
            .recorded(generation, namespace, key)
            .await?
            .into_iter()
            .map(|tag| tag.name)
            .collect())
    }

    /// Tags recorded on the entry under `key`, with their indexing state.
    pub async fn recorded(
        &self,
        generation: &BuildGeneration,
        namespace: Namespace,
        key: &CacheKey,
    ) -> Result<Vec<RecordedTag>> {
        let path = Layout::new(generation).entry_tags(namespace, key);
        match self.kv.get(&path).await? {
            None => Ok(Vec::new()),
            Some(Value::Object(tags)) => Ok(recorded_tags(&tags)),
            Some(other) => Err(Error::corruption(
                path.to_string(),
                format!("expected tag map, found {other}"),
            )),
        }
    }

    /// Advance the watermark of `tag` to at least `at` and return the stored value.
    ///
    /// Never moves a watermark backwards, even under concurrent calls.
    pub async fn touch(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
        at: Timestamp,
    ) -> Result<Timestamp> {
        let path = Layout::new(generation).tag_watermark(tag);
        let stored = self.kv.fetch_max(&path, at.as_millis()).await?;
        Ok(Timestamp::from_millis(stored))
    }

    /// Advance the watermark of `tag` to the store's current time.
    pub async fn touch_now(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
    ) -> Result<Timestamp> {
        let now = self.kv.now().await?;
        self.touch(generation, tag, now).await
    }

    pub async fn revalidated_at(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
    ) -> Result<Option<Timestamp>> {
        let path = Layout::new(generation).tag_watermark(tag);
        match self.kv.get(&path).await? {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(|millis| Some(Timestamp::from_millis(millis)))
                .ok_or_else(|| {
                    Error::corruption(path.to_string(), format!("non-numeric watermark {value}"))
                }),
        }
    }

    /// Render keys indexed under `tag`, decoded on a best-effort basis.
    pub async fn get_associated_keys(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
    ) -> Result<Vec<CacheKey>> {
        Ok(self
            .record(generation, tag)
            .await?
            .map(|record| record.associated_keys.into_iter().collect())
            .unwrap_or_default())
    }

    /// Full record of `tag`, or `None` if nothing was ever stored for it.
    pub async fn record(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
    ) -> Result<Option<TagRecord>> {
        let path = Layout::new(generation).tag(tag);
        let Some(node) = self.kv.get(&path).await? else {
            return Ok(None);
        };
        let node: TagNode = serde_json::from_value(node)
            .map_err(|e| Error::corruption(path.to_string(), e.to_string()))?;
        Ok(Some(node.into()))
    }

    /// Watermark view bound to one generation.
    pub fn watermarks<'a>(&'a self, generation: &'a BuildGeneration) -> GenerationWatermarks<'a> {
        GenerationWatermarks {
            index: self,
            generation,
        }
    }
}

/// [`WatermarkLookup`] over the tags of a single generation.
pub struct GenerationWatermarks<'a> {
    index: &'a TagIndex,
    generation: &'a BuildGeneration,
}

#[async_trait]
impl WatermarkLookup for GenerationWatermarks<'_> {
    async fn revalidated_at(&self, tag: &TagName) -> Result<Option<Timestamp>> {
        self.index.revalidated_at(self.generation, tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regen_kv::{FaultyStore, MemoryStore};

    fn tags(names: &[&str]) -> Vec<TagName> {
        names.iter().map(|name| TagName::new(*name)).collect()
    }

    fn setup() -> (Arc<MemoryStore>, TagIndex, BuildGeneration) {
        let kv = Arc::new(MemoryStore::new());
        let index = TagIndex::new(kv.clone());
        (kv, index, BuildGeneration::new("build-1"))
    }

    #[tokio::test]
    async fn test_associate_render_key() {
        let (_, index, generation) = setup();
        let key = CacheKey::new("/blog/post-1");

        let indexed = index
            .associate(&generation, Namespace::Render, &key, &tags(&["blog", "post.1"]))
            .await
            .unwrap();
        assert_eq!(indexed, 2);

        let mut recorded = index
            .get_tags(&generation, Namespace::Render, &key)
            .await
            .unwrap();
        recorded.sort();
        assert_eq!(recorded, tags(&["blog", "post.1"]));

        let keys = index
            .get_associated_keys(&generation, &TagName::new("post.1"))
            .await
            .unwrap();
        assert_eq!(keys, vec![key]);
    }

    #[tokio::test]
    async fn test_fetch_keys_are_not_indexed() {
        let (_, index, generation) = setup();
        let key = CacheKey::new("abc123");

        let indexed = index
            .associate(&generation, Namespace::Fetch, &key, &tags(&["posts"]))
            .await
            .unwrap();
        assert_eq!(indexed, 0);

        assert_eq!(
            index
                .get_tags(&generation, Namespace::Fetch, &key)
                .await
                .unwrap(),
            tags(&["posts"])
        );
        assert!(
            index
                .get_associated_keys(&generation, &TagName::new("posts"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_get_tags_missing_entry() {
        let (_, index, generation) = setup();
        let recorded = index
            .get_tags(&generation, Namespace::Render, &CacheKey::new("/none"))
            .await
            .unwrap();
        assert!(recorded.is_empty());
    }

    #[tokio::test]
    async fn test_touch_is_monotonic() {
        let (_, index, generation) = setup();
        let tag = TagName::new("blog");

        assert_eq!(
            index
                .touch(&generation, &tag, Timestamp::from_millis(200))
                .await
                .unwrap(),
            Timestamp::from_millis(200)
        );
        assert_eq!(
            index
                .touch(&generation, &tag, Timestamp::from_millis(100))
                .await
                .unwrap(),
            Timestamp::from_millis(200)
        );
        assert_eq!(
            index.revalidated_at(&generation, &tag).await.unwrap(),
            Some(Timestamp::from_millis(200))
        );
    }

    #[tokio::test]
    async fn test_touch_keeps_reverse_index() {
        let (_, index, generation) = setup();
        let tag = TagName::new("blog");
        let key = CacheKey::new("/blog");

        index
            .associate(&generation, Namespace::Render, &key, &[tag.clone()])
            .await
            .unwrap();
        index
            .touch(&generation, &tag, Timestamp::from_millis(10))
            .await
            .unwrap();

        let record = index.record(&generation, &tag).await.unwrap().unwrap();
        assert_eq!(record.revalidated_at, Some(Timestamp::from_millis(10)));
        assert!(record.associated_keys.contains(&key));
    }

    #[tokio::test]
    async fn test_reverse_index_failure_is_tolerated() {
        let kv = Arc::new(FaultyStore::new(MemoryStore::new()));
        kv.only_under(Some("build-1/tags"));
        kv.fail_writes(true);
        let index = TagIndex::new(kv.clone());
        let generation = BuildGeneration::new("build-1");
        let key = CacheKey::new("/blog");

        let indexed = index
            .associate(&generation, Namespace::Render, &key, &tags(&["blog"]))
            .await
            .unwrap();
        assert_eq!(indexed, 0);
        assert_eq!(
            index
                .get_tags(&generation, Namespace::Render, &key)
                .await
                .unwrap(),
            tags(&["blog"])
        );
    }

    #[tokio::test]
    async fn test_unindexed_tag_stays_pending_until_retried() {
        let kv = Arc::new(FaultyStore::new(MemoryStore::new()));
        let index = TagIndex::new(kv.clone());
        let generation = BuildGeneration::new("build-1");
        let key = CacheKey::new("/blog");

        kv.only_under(Some("build-1/tags/news"));
        kv.fail_writes(true);
        index
            .associate(&generation, Namespace::Render, &key, &tags(&["blog", "news"]))
            .await
            .unwrap();

        let mut recorded = index
            .recorded(&generation, Namespace::Render, &key)
            .await
            .unwrap();
        recorded.sort_by(|a, b| a.name.cmp(&b.name));
        assert!(!recorded[0].pending);
        assert!(recorded[1].pending);

        kv.fail_writes(false);
        let indexed = index
            .associate(&generation, Namespace::Render, &key, &tags(&["news"]))
            .await
            .unwrap();
        assert_eq!(indexed, 1);
        assert!(
            index
                .recorded(&generation, Namespace::Render, &key)
                .await
                .unwrap()
                .iter()
                .all(|tag| !tag.pending)
        );
        assert_eq!(
            index
                .get_associated_keys(&generation, &TagName::new("news"))
                .await
                .unwrap(),
            vec![key]
        );
    }

    #[tokio::test]
    async fn test_touch_now_uses_store_clock() {
        let clock = Arc::new(regen_core::ManualClock::new(Timestamp::from_millis(9_000)));
        let index = TagIndex::new(Arc::new(MemoryStore::with_clock(clock)));
        let generation = BuildGeneration::new("build-1");
        let tag = TagName::new("blog");

        assert_eq!(
            index.touch_now(&generation, &tag).await.unwrap(),
            Timestamp::from_millis(9_000)
        );
    }

    #[tokio::test]
    async fn test_generations_are_isolated() {
        let (_, index, _) = setup();
        let tag = TagName::new("blog");

        index
            .touch(&BuildGeneration::new("old"), &tag, Timestamp::from_millis(10))
            .await
            .unwrap();

        assert_eq!(
            index
                .revalidated_at(&BuildGeneration::new("new"), &tag)
                .await
                .unwrap(),
            None
        );
    }
}
