//! Collect → map → dedup-save.
//!
//! Fetching and persisting are separate steps: the collector only returns
//! events, and a failed save can be retried without hitting the feed again.

use anyhow::{Context, Result};
use binggo_ingest::{to_new_wallpapers, CollectionRequest, Collector};
use binggo_storage::WallpaperRepository;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectSummary {
    /// Raw records returned by the feed.
    pub collected: usize,
    /// Records that passed validation.
    pub mapped: usize,
    /// Rows actually written (new natural keys).
    pub inserted: usize,
}

impl CollectSummary {
    pub fn duplicates(&self) -> usize {
        self.mapped - self.inserted
    }
}

pub async fn run_collection(
    collector: &Collector,
    repo: &WallpaperRepository,
    request: &CollectionRequest,
    base_url: &str,
    cancel: &CancellationToken,
) -> Result<CollectSummary> {
    let events = collector
        .collect(request, cancel)
        .await
        .context("invalid collection request")?;

    let rows = to_new_wallpapers(&events, base_url);
    let inserted = repo
        .bulk_save_if_not_exists(&rows, cancel)
        .await
        .context("failed to save collected wallpapers")?;

    let summary = CollectSummary {
        collected: events.len(),
        mapped: rows.len(),
        inserted,
    };
    info!(
        collected = summary.collected,
        mapped = summary.mapped,
        inserted = summary.inserted,
        duplicates = summary.duplicates(),
        "collection pipeline finished"
    );
    Ok(summary)
}
