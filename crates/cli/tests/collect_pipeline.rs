//! Collect → map → dedup-save against a real SQLite file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use binggo_cli::run_collection;
use binggo_core::{BingImage, MarketCode, ResolutionCode};
use binggo_ingest::{CollectionRequest, Collector, FeedClient};
use binggo_storage::{init_pool_at, WallpaperRepository};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Two records with distinct hashes and dates for en-US; nothing elsewhere.
struct TwoDayFeed {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl FeedClient for TwoDayFeed {
    async fn fetch_metadata(
        &self,
        _count: u32,
        market: MarketCode,
        _resolution: ResolutionCode,
        _cancel: &CancellationToken,
    ) -> Vec<BingImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if market != MarketCode::UnitedStates {
            return Vec::new();
        }
        vec![
            BingImage {
                url_base: "/th?id=OHR.Older_EN-US1".into(),
                title: "Older".into(),
                hash: "hash-older".into(),
                start_date: "20250130".into(),
                ..Default::default()
            },
            BingImage {
                url_base: "/th?id=OHR.Newer_EN-US2".into(),
                title: "Newer".into(),
                hash: "hash-newer".into(),
                start_date: "20250131".into(),
                ..Default::default()
            },
        ]
    }
}

async fn setup() -> (TempDir, WallpaperRepository, Collector, Arc<AtomicUsize>) {
    let dir = TempDir::new().unwrap();
    let pool = init_pool_at(&dir.path().join("binggo.db"), 5).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let collector = Collector::new(Arc::new(TwoDayFeed { calls: calls.clone() }), 3).unwrap();
    (dir, WallpaperRepository::new(pool), collector, calls)
}

fn us_request(all_markets: bool) -> CollectionRequest {
    CollectionRequest {
        all_markets,
        market: "US".parse().unwrap(),
        days: 1,
        resolution: ResolutionCode::Uhd4k,
    }
}

#[tokio::test]
async fn collect_us_then_latest_returns_newest() {
    let (_dir, repo, collector, _) = setup().await;
    let cancel = CancellationToken::new();

    let summary = run_collection(&collector, &repo, &us_request(false), "https://www.bing.com", &cancel)
        .await
        .unwrap();
    assert_eq!(summary.collected, 2);
    assert_eq!(summary.inserted, 2);

    let latest = repo.get_latest(MarketCode::UnitedStates, 1).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].hash, "hash-newer");
    assert_eq!(
        latest[0].info.image_url(ResolutionCode::Uhd4k),
        Some("https://www.bing.com/th?id=OHR.Newer_EN-US2_UHD.jpg")
    );
}

#[tokio::test]
async fn repeated_collection_inserts_nothing_new() {
    let (_dir, repo, collector, _) = setup().await;
    let cancel = CancellationToken::new();

    let first = run_collection(&collector, &repo, &us_request(false), "https://www.bing.com", &cancel)
        .await
        .unwrap();
    let second = run_collection(&collector, &repo, &us_request(false), "https://www.bing.com", &cancel)
        .await
        .unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates(), 2);
    assert_eq!(repo.count().await.unwrap(), 2);
}

#[tokio::test]
async fn all_markets_fans_out_and_tolerates_empty_markets() {
    let (_dir, repo, collector, calls) = setup().await;
    let summary = run_collection(
        &collector,
        &repo,
        &us_request(true),
        "https://www.bing.com",
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), MarketCode::ALL.len());
    assert_eq!(summary.inserted, 2);
}
