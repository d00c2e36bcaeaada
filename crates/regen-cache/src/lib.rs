//! Shared artifact cache for server-side rendering hosts.
//!
//! Entries live in a hierarchical key-value store scoped by build generation.
//! Invalidation is lazy: revalidating a tag only moves its watermark forward,
//! and reads compare each entry's write time against the watermarks of its
//! tags. Render paths indexed under a tag are also purged at the edge.

pub mod config;
pub mod handler;
pub mod keys;
pub mod metrics;
pub mod revalidate;
pub mod staleness;
pub mod store;
pub mod tags;
pub mod types;

pub use config::{CacheConfig, ConfigError, PurgeSettings};
pub use handler::{
    CacheHandler, CacheLookup, IMPLICIT_TAG_PREFIX, MissReason, WriteOutcome, implicit_tag,
};
pub use keys::{PLACEHOLDER, decode_key, encode_key, is_storage_safe};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use revalidate::{PurgeFailure, PurgeReport, RevalidationCoordinator, RevalidationOutcome};
pub use staleness::{Freshness, WatermarkLookup, evaluate, is_stale};
pub use store::{ArtifactStore, StoredEntry};
pub use tags::{GenerationWatermarks, TagIndex};
pub use types::{Layout, Namespace, RecordedTag, ResponseMeta, StoredPayload, TagRecord};
