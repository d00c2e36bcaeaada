//! Tag-watermark staleness checks.
//!
//! An entry is stale when any of its tags was revalidated strictly after the
//! entry was written. A tag revalidated at the same instant leaves it fresh.

use async_trait::async_trait;
use regen_core::{Result, TagName, Timestamp};
use std::collections::HashMap;

/// Source of tag watermarks.
#[async_trait]
pub trait WatermarkLookup: Send + Sync {
    /// Last revalidation time of `tag`, or `None` if it was never revalidated.
    async fn revalidated_at(&self, tag: &TagName) -> Result<Option<Timestamp>>;
}

#[async_trait]
impl WatermarkLookup for HashMap<TagName, Timestamp> {
    async fn revalidated_at(&self, tag: &TagName) -> Result<Option<Timestamp>> {
        Ok(self.get(tag).copied())
    }
}

/// Verdict on a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// `tag` was revalidated after the entry was written.
    Stale {
        tag: TagName,
        revalidated_at: Timestamp,
    },
    /// The watermark of `tag` could not be read.
    Unknown { tag: TagName, reason: String },
}

impl Freshness {
    /// Whether the entry must not be served.
    pub fn is_stale(&self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

/// Check `tags` against an in-memory view of watermarks.
pub fn is_stale<F>(last_modified: Timestamp, tags: &[TagName], mut watermark: F) -> bool
where
    F: FnMut(&TagName) -> Option<Timestamp>,
{
    tags.iter()
        .any(|tag| watermark(tag).is_some_and(|at| at > last_modified))
}

/// Check `tags` one by one, stopping at the first stale or unreadable tag.
pub async fn evaluate<L>(last_modified: Timestamp, tags: &[TagName], lookup: &L) -> Freshness
where
    L: WatermarkLookup + ?Sized,
{
    for tag in tags {
        match lookup.revalidated_at(tag).await {
            Ok(Some(revalidated_at)) if revalidated_at > last_modified => {
                return Freshness::Stale {
                    tag: tag.clone(),
                    revalidated_at,
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Freshness::Unknown {
                    tag: tag.clone(),
                    reason: e.to_string(),
                };
            }
        }
    }
    Freshness::Fresh
}
