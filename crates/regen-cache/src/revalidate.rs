//! Tag revalidation: advance the watermark, then purge indexed keys at the edge.

use crate::metrics::CacheMetrics;
use crate::tags::TagIndex;
use futures::future::join_all;
use regen_core::{BuildGeneration, CacheKey, PurgeSender, TagName, Timestamp};
use regen_trace::purge_span;
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

/// A purge that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeFailure {
    pub key: CacheKey,
    pub reason: String,
}

/// Result of one purge fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<PurgeFailure>,
}

/// Result of revalidating a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidationOutcome {
    pub tag: TagName,
    /// Watermark now stored for the tag; `None` if it could not be advanced.
    pub watermark: Option<Timestamp>,
    pub purge: PurgeReport,
}

impl RevalidationOutcome {
    /// Whether entries carrying the tag will now read as stale.
    pub fn invalidated(&self) -> bool {
        self.watermark.is_some()
    }
}

/// Drives revalidation of one tag at a time.
#[derive(Clone)]
pub struct RevalidationCoordinator {
    tags: TagIndex,
    purger: Arc<dyn PurgeSender>,
    metrics: Arc<CacheMetrics>,
}

impl RevalidationCoordinator {
    pub fn new(tags: TagIndex, purger: Arc<dyn PurgeSender>, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            tags,
            purger,
            metrics,
        }
    }

    /// Invalidate every entry tagged `tag` as of the store's current time.
    ///
    /// The watermark is advanced before any purge is sent, so a request the
    /// edge forwards after its purge can never be served the old entry. A
    /// failed watermark write is logged and purging still proceeds.
    pub async fn revalidate(
        &self,
        generation: &BuildGeneration,
        tag: &TagName,
    ) -> RevalidationOutcome {
        self.metrics.record_revalidation();

        let watermark = match self.tags.touch_now(generation, tag).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                self.metrics.record_store_error();
                warn!(tag = %tag, error = %e, "Failed to advance tag watermark");
                None
            }
        };

        let keys = match self.tags.get_associated_keys(generation, tag).await {
            Ok(keys) => keys,
            Err(e) => {
                self.metrics.record_store_error();
                warn!(tag = %tag, error = %e, "Failed to read keys indexed under tag");
                Vec::new()
            }
        };

        let purge = self.purge_all(keys).await;
        info!(
            tag = %tag,
            watermark = watermark.map(|w| w.as_millis()),
            purged = purge.succeeded,
            failed = purge.failed.len(),
            "Revalidated tag"
        );

        RevalidationOutcome {
            tag: tag.clone(),
            watermark,
            purge,
        }
    }

    /// Purge every key concurrently; one failure never stops the others.
    async fn purge_all(&self, keys: Vec<CacheKey>) -> PurgeReport {
        let attempted = keys.len();
        let requests = keys.into_iter().map(|key| {
            let span = purge_span(key.as_str());
            async move {
                let result = self.purger.purge(key.as_str()).await;
                (key, result)
            }
            .instrument(span)
        });

        let mut report = PurgeReport {
            attempted,
            ..Default::default()
        };
        for (key, result) in join_all(requests).await {
            match result {
                Ok(()) => {
                    debug!(key = %key, "Purged");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Purge failed");
                    report.failed.push(PurgeFailure {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.metrics
            .record_purges(report.succeeded as u64, report.failed.len() as u64);
        report
    }
}
