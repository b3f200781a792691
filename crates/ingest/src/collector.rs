//! Collection orchestrator: per-market fan-out over the feed client.
//!
//! In all-markets mode one tokio task is spawned per [`MarketCode`], each
//! admitted through a semaphore of width `max_concurrent_requests`. Results
//! are merged unordered. A market that fails or panics contributes nothing;
//! its siblings are unaffected.
//!
//! The collector never touches storage. Mapping and persistence are separate
//! steps so that a failed save can be retried without re-fetching.

use std::sync::Arc;

use binggo_core::config::{CollectionConfig, MAX_CONCURRENT_REQUESTS, MAX_HISTORY_DAYS};
use binggo_core::{CollectedEvent, CoreError, MarketCode, ResolutionCode};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::FeedClient;

/// What to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionRequest {
    pub all_markets: bool,
    /// Ignored when `all_markets` is set.
    pub market: MarketCode,
    pub days: u32,
    pub resolution: ResolutionCode,
}

impl From<&CollectionConfig> for CollectionRequest {
    fn from(c: &CollectionConfig) -> Self {
        Self {
            all_markets: c.all_markets,
            market: c.market,
            days: c.days,
            resolution: c.resolution,
        }
    }
}

pub struct Collector {
    client: Arc<dyn FeedClient>,
    semaphore: Arc<Semaphore>,
}

impl Collector {
    pub fn new(client: Arc<dyn FeedClient>, max_concurrent_requests: u32) -> Result<Self, CoreError> {
        if max_concurrent_requests < 1 || max_concurrent_requests > MAX_CONCURRENT_REQUESTS {
            return Err(CoreError::OutOfRange {
                key: "MAX_CONCURRENT_REQUESTS",
                value: max_concurrent_requests,
                min: 1,
                max: MAX_CONCURRENT_REQUESTS,
            });
        }
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests as usize)),
        })
    }

    /// Run one collection. Only argument validation fails; feed failures
    /// degrade to fewer (or zero) events.
    pub async fn collect(
        &self,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<CollectedEvent>, CoreError> {
        if request.days < 1 || request.days > MAX_HISTORY_DAYS {
            return Err(CoreError::OutOfRange {
                key: "days",
                value: request.days,
                min: 1,
                max: MAX_HISTORY_DAYS,
            });
        }

        info!(
            all_markets = request.all_markets,
            market = %request.market,
            days = request.days,
            resolution = %request.resolution,
            "starting collection"
        );

        let events = if request.all_markets {
            self.collect_all(request.days, request.resolution, cancel).await
        } else {
            collect_market(
                self.client.as_ref(),
                request.market,
                request.days,
                request.resolution,
                cancel,
            )
            .await
        };

        if cancel.is_cancelled() {
            warn!(collected = events.len(), "collection cancelled, discarding results");
            return Ok(Vec::new());
        }

        info!(events = events.len(), "collection finished");
        Ok(events)
    }

    async fn collect_all(
        &self,
        days: u32,
        resolution: ResolutionCode,
        cancel: &CancellationToken,
    ) -> Vec<CollectedEvent> {
        let handles = MarketCode::ALL.into_iter().map(|market| {
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Vec::new(),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return Vec::new(),
                    },
                };
                collect_market(client.as_ref(), market, days, resolution, &cancel).await
            });
            async move { (market, handle.await) }
        });

        let mut merged = Vec::new();
        let mut failed_markets = 0usize;
        for (market, result) in join_all(handles).await {
            match result {
                Ok(events) => merged.extend(events),
                Err(e) => {
                    failed_markets += 1;
                    error!(market = %market, error = %e, "market collection task failed");
                }
            }
        }

        info!(
            markets = MarketCode::ALL.len(),
            failed_markets,
            events = merged.len(),
            "all-markets collection merged"
        );
        merged
    }
}

async fn collect_market(
    client: &dyn FeedClient,
    market: MarketCode,
    days: u32,
    resolution: ResolutionCode,
    cancel: &CancellationToken,
) -> Vec<CollectedEvent> {
    let records = client.fetch_metadata(days, market, resolution, cancel).await;
    if records.is_empty() {
        warn!(market = %market, "no records collected");
        return Vec::new();
    }

    let collected_at = Utc::now();
    info!(market = %market, records = records.len(), "collected records");
    records
        .into_iter()
        .map(|record| CollectedEvent { market, resolution, collected_at, record })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use binggo_core::BingImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns `count` records per market, except for `failing` which yields
    /// nothing. Tracks peak concurrency.
    struct MockFeed {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        failing: Option<MarketCode>,
    }

    impl MockFeed {
        fn new(failing: Option<MarketCode>) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                failing,
            }
        }
    }

    #[async_trait]
    impl FeedClient for MockFeed {
        async fn fetch_metadata(
            &self,
            count: u32,
            market: MarketCode,
            _resolution: ResolutionCode,
            _cancel: &CancellationToken,
        ) -> Vec<BingImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if Some(market) == self.failing {
                return Vec::new();
            }
            (0..count)
                .map(|i| BingImage {
                    hash: format!("{}-{i}", market.code()),
                    ..Default::default()
                })
                .collect()
        }
    }

    fn request(all_markets: bool, days: u32) -> CollectionRequest {
        CollectionRequest {
            all_markets,
            market: MarketCode::UnitedStates,
            days,
            resolution: ResolutionCode::Uhd4k,
        }
    }

    #[tokio::test]
    async fn single_market_calls_once_with_days() {
        let feed = MockFeed::new(None);
        let calls = feed.calls.clone();
        let collector = Collector::new(Arc::new(feed), 3).unwrap();

        let events = collector.collect(&request(false, 2), &CancellationToken::new()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.iter().all(|e| e.market == MarketCode::UnitedStates));
    }

    #[tokio::test]
    async fn all_markets_is_bounded_and_tolerates_failures() {
        let feed = MockFeed::new(Some(MarketCode::Japan));
        let calls = feed.calls.clone();
        let peak = feed.peak.clone();
        let collector = Collector::new(Arc::new(feed), 2).unwrap();

        let events = collector.collect(&request(true, 1), &CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), MarketCode::ALL.len());
        assert_eq!(events.len(), MarketCode::ALL.len() - 1);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(events.iter().all(|e| e.market != MarketCode::Japan));
    }

    #[tokio::test]
    async fn days_out_of_range_is_rejected() {
        let collector = Collector::new(Arc::new(MockFeed::new(None)), 3).unwrap();
        let cancel = CancellationToken::new();
        assert!(collector.collect(&request(false, 0), &cancel).await.is_err());
        assert!(collector.collect(&request(false, MAX_HISTORY_DAYS + 1), &cancel).await.is_err());
    }

    #[test]
    fn concurrency_out_of_range_is_rejected() {
        assert!(Collector::new(Arc::new(MockFeed::new(None)), 0).is_err());
        assert!(Collector::new(Arc::new(MockFeed::new(None)), MAX_CONCURRENT_REQUESTS + 1).is_err());
    }

    #[tokio::test]
    async fn cancelled_collection_returns_nothing() {
        let collector = Collector::new(Arc::new(MockFeed::new(None)), 3).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = collector.collect(&request(true, 1), &cancel).await.unwrap();
        assert!(events.is_empty());
    }
}
