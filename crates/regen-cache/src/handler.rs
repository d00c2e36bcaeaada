//! Host-facing cache handler.
//!
//! Every operation degrades instead of failing: a read that cannot be
//! answered safely is a miss, a write that cannot be completed is dropped.
//! Outcomes are returned for callers that want to know which happened.

use crate::config::{CacheConfig, ConfigError};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::revalidate::{RevalidationCoordinator, RevalidationOutcome};
use crate::staleness::{Freshness, evaluate};
use crate::store::ArtifactStore;
use crate::tags::TagIndex;
use crate::types::Namespace;
use regen_core::{
    BuildGeneration, CacheHit, CacheKey, CacheValue, Error, GetOptions, KeyValueStore,
    PurgeSender, SetContext, TagName, Timestamp,
};
use regen_trace::{CacheAttributes, get_span, revalidate_span, set_span};
use std::sync::Arc;
use tracing::{Instrument, debug, warn};

/// Prefix of the tag the host attaches to everything rendered for a path.
pub const IMPLICIT_TAG_PREFIX: &str = "_N_T_";

/// Why a read returned nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    /// A tag of the entry was revalidated after it was written.
    Stale {
        tag: TagName,
        revalidated_at: Timestamp,
    },
    /// The stored payload could not be decoded.
    Corrupt,
    /// The store could not answer.
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheHit),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn into_hit(self) -> Option<CacheHit> {
        match self {
            CacheLookup::Hit(hit) => Some(hit),
            CacheLookup::Miss(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Entry written; `new_tags` associations were added.
    Stored { new_tags: usize },
    Removed,
    /// Nothing durable happened.
    Dropped { reason: String },
}

/// The pluggable cache handler one host process talks to.
#[derive(Clone)]
pub struct CacheHandler {
    generation: BuildGeneration,
    tags_header: String,
    store: ArtifactStore,
    tags: TagIndex,
    coordinator: RevalidationCoordinator,
    metrics: Arc<CacheMetrics>,
}

impl CacheHandler {
    pub fn new(
        config: &CacheConfig,
        kv: Arc<dyn KeyValueStore>,
        purger: Arc<dyn PurgeSender>,
    ) -> Self {
        let metrics = CacheMetrics::new();
        let tags = TagIndex::new(kv.clone());
        Self {
            generation: BuildGeneration::new(config.build_id.clone()),
            tags_header: config.cache_tags_header.clone(),
            store: ArtifactStore::new(kv),
            coordinator: RevalidationCoordinator::new(tags.clone(), purger, metrics.clone()),
            tags,
            metrics,
        }
    }

    /// Build a handler whose purge target comes from `config`.
    pub fn from_config(
        config: &CacheConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let purger = regen_purge::create_purger(&config.purge_config())
            .map_err(|e| ConfigError::Invalid {
                key: "public_url",
                reason: e.to_string(),
            })?;
        Ok(Self::new(config, kv, purger))
    }

    pub fn generation(&self) -> &BuildGeneration {
        &self.generation
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fresh entry under `key`, or `None`.
    pub async fn get(&self, key: &str, options: GetOptions) -> Option<CacheHit> {
        self.lookup(key, options).await.into_hit()
    }

    /// Like [`get`](Self::get), reporting why a miss happened.
    pub async fn lookup(&self, key: &str, options: GetOptions) -> CacheLookup {
        let attrs = CacheAttributes::new(self.generation.as_str())
            .key(key)
            .fetch_cache(options.fetch_cache);
        let key = CacheKey::new(key);
        let outcome = self
            .read(&key, Namespace::for_options(options))
            .instrument(get_span(&attrs))
            .await;

        match &outcome {
            CacheLookup::Hit(_) => self.metrics.record_hit(),
            CacheLookup::Miss(MissReason::Absent) => self.metrics.record_miss(),
            CacheLookup::Miss(MissReason::Stale { .. }) => self.metrics.record_stale(),
            CacheLookup::Miss(MissReason::Corrupt) => self.metrics.record_corrupt(),
            CacheLookup::Miss(MissReason::StoreUnavailable) => self.metrics.record_store_error(),
        }
        outcome
    }

    async fn read(&self, key: &CacheKey, namespace: Namespace) -> CacheLookup {
        let entry = match self.store.get(&self.generation, namespace, key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return CacheLookup::Miss(MissReason::Absent),
            Err(Error::Corruption { .. }) => return CacheLookup::Miss(MissReason::Corrupt),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return CacheLookup::Miss(MissReason::StoreUnavailable);
            }
        };

        let tags = match self.tags.get_tags(&self.generation, namespace, key).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read entry tags");
                return CacheLookup::Miss(MissReason::StoreUnavailable);
            }
        };

        let watermarks = self.tags.watermarks(&self.generation);
        match evaluate(entry.last_modified, &tags, &watermarks).await {
            Freshness::Fresh => CacheLookup::Hit(CacheHit {
                last_modified: entry.last_modified,
                value: entry.value,
            }),
            Freshness::Stale {
                tag,
                revalidated_at,
            } => {
                debug!(key = %key, tag = %tag, "Entry invalidated by tag");
                CacheLookup::Miss(MissReason::Stale {
                    tag,
                    revalidated_at,
                })
            }
            Freshness::Unknown { tag, reason } => {
                warn!(key = %key, tag = %tag, reason = %reason, "Tag watermark unavailable");
                CacheLookup::Miss(MissReason::StoreUnavailable)
            }
        }
    }

    /// Store `value` under `key`, or remove the entry when `value` is `None`.
    pub async fn set(
        &self,
        key: &str,
        value: Option<CacheValue>,
        ctx: &SetContext,
    ) -> WriteOutcome {
        let mut attrs = CacheAttributes::new(self.generation.as_str()).key(key);
        if let Some(value) = &value {
            attrs = attrs.kind(value.kind().as_str());
        }
        let key = CacheKey::new(key);
        let outcome = match value {
            Some(value) => self.write(&key, value, ctx).instrument(set_span(&attrs)).await,
            None => self.remove(&key).instrument(set_span(&attrs)).await,
        };

        match &outcome {
            WriteOutcome::Stored { new_tags } => self.metrics.record_write(*new_tags as u64),
            WriteOutcome::Removed => self.metrics.record_removal(),
            WriteOutcome::Dropped { .. } => self.metrics.record_dropped_write(),
        }
        outcome
    }

    async fn write(&self, key: &CacheKey, value: CacheValue, ctx: &SetContext) -> WriteOutcome {
        let namespace = Namespace::of(&value);
        let derived = value.derived_tags(ctx, &self.tags_header);

        if let Err(e) = self.store.set(&self.generation, key, value).await {
            warn!(key = %key, error = %e, "Dropping cache write");
            return WriteOutcome::Dropped {
                reason: e.to_string(),
            };
        }
        if derived.is_empty() {
            return WriteOutcome::Stored { new_tags: 0 };
        }

        // An unreadable tag list means associating everything again.
        let known = match self.tags.recorded(&self.generation, namespace, key).await {
            Ok(known) => known,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read existing tags");
                Vec::new()
            }
        };
        // Tags still owed a reverse-index write are associated again.
        let delta: Vec<TagName> = derived
            .into_iter()
            .filter(|tag| {
                !known
                    .iter()
                    .any(|recorded| recorded.name == *tag && !recorded.pending)
            })
            .collect();
        if delta.is_empty() {
            return WriteOutcome::Stored { new_tags: 0 };
        }

        match self
            .tags
            .associate(&self.generation, namespace, key, &delta)
            .await
        {
            Ok(_) => WriteOutcome::Stored {
                new_tags: delta.len(),
            },
            Err(e) => {
                // An entry without its tags could outlive a revalidation.
                warn!(key = %key, error = %e, "Failed to record tags, discarding entry");
                if let Err(e) = self.store.remove(&self.generation, key).await {
                    warn!(key = %key, error = %e, "Failed to discard untagged entry");
                }
                WriteOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn remove(&self, key: &CacheKey) -> WriteOutcome {
        match self.store.remove(&self.generation, key).await {
            Ok(()) => WriteOutcome::Removed,
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping cache removal");
                WriteOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Invalidate every entry carrying `tag` and purge its indexed paths.
    pub async fn revalidate_tag(&self, tag: &str) -> RevalidationOutcome {
        let attrs = CacheAttributes::new(self.generation.as_str()).tag(tag);
        let tag = TagName::new(tag);
        self.coordinator
            .revalidate(&self.generation, &tag)
            .instrument(revalidate_span(&attrs))
            .await
    }

    /// Invalidate everything rendered for `path`.
    pub async fn revalidate_path(&self, path: &str) -> RevalidationOutcome {
        self.revalidate_tag(&implicit_tag(path)).await
    }
}

/// Tag the host attaches to everything rendered for `path`.
pub fn implicit_tag(path: &str) -> String {
    format!("{IMPLICIT_TAG_PREFIX}{path}")
}
