//! Archive feed client.
//!
//! [`FeedClient`] is the seam the collector talks to. Its contract never
//! fails: any error ends up logged and turned into an empty record list, so
//! the collector can treat "nothing fetched" uniformly.

use std::time::Duration;

use async_trait::async_trait;
use binggo_core::config::FeedConfig;
use binggo_core::{BingImage, FeedResponse, MarketCode, ResolutionCode, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::FeedError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch up to `count` of the most recent records for one market.
    /// Returns an empty list on failure or cancellation.
    async fn fetch_metadata(
        &self,
        count: u32,
        market: MarketCode,
        resolution: ResolutionCode,
        cancel: &CancellationToken,
    ) -> Vec<BingImage>;
}

/// HTTP client for the image archive endpoint.
///
/// Each call goes through the network [`RetryPolicy`]; transient failures
/// (timeouts, connect errors, 408/429/5xx) are retried before giving up.
pub struct BingFeedClient {
    client: Client,
    archive_url: String,
    retry: RetryPolicy,
}

impl BingFeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        Self::with_timeout(config.archive_url.clone(), config.timeout())
    }

    pub fn with_timeout(archive_url: String, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            archive_url,
            retry: RetryPolicy::network(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the archive query URL for one (market, resolution) request.
    pub fn request_url(
        &self,
        count: u32,
        market: MarketCode,
        resolution: ResolutionCode,
    ) -> Result<Url, FeedError> {
        let info = resolution.info();
        let url = Url::parse_with_params(
            &self.archive_url,
            &[
                ("format", "js".to_string()),
                ("idx", "0".to_string()),
                ("n", count.to_string()),
                ("setmkt", market.code().to_string()),
                ("setlang", market.language().to_string()),
                ("pid", "hp".to_string()),
                ("FORM", "BEHPTB".to_string()),
                ("uhd", "1".to_string()),
                ("uhdwidth", info.width.to_string()),
                ("uhdheight", info.height.to_string()),
            ],
        )?;
        Ok(url)
    }

    fn headers(market: MarketCode) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Ok(lang) = HeaderValue::from_str(&format!("{},en;q=0.9", market.language())) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }
        headers
    }

    /// One request, no retries.
    pub async fn try_fetch(
        &self,
        count: u32,
        market: MarketCode,
        resolution: ResolutionCode,
    ) -> Result<Vec<BingImage>, FeedError> {
        let url = self.request_url(count, market, resolution)?;
        debug!(market = %market, url = %url, "fetching archive");

        let response = self
            .client
            .get(url)
            .headers(Self::headers(market))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let parsed: FeedResponse = response.json().await?;
        Ok(parsed.images)
    }
}

#[async_trait]
impl FeedClient for BingFeedClient {
    async fn fetch_metadata(
        &self,
        count: u32,
        market: MarketCode,
        resolution: ResolutionCode,
        cancel: &CancellationToken,
    ) -> Vec<BingImage> {
        let attempt = self
            .retry
            .run("fetch_metadata", move || self.try_fetch(count, market, resolution));

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(FeedError::Cancelled),
            r = attempt => r,
        };

        match result {
            Ok(images) => images,
            Err(FeedError::Cancelled) => {
                debug!(market = %market, "feed request cancelled");
                Vec::new()
            }
            Err(e) => {
                warn!(market = %market, resolution = %resolution, error = %e, "failed to fetch archive");
                Vec::new()
            }
        }
    }
}
