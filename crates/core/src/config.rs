use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::market::MarketCode;
use crate::resolution::ResolutionCode;

/// Upper bound for `COLLECT_DAYS`: the feed keeps at most 8 days of history.
pub const MAX_HISTORY_DAYS: u32 = 8;
/// Upper bound for `MAX_CONCURRENT_REQUESTS`.
pub const MAX_CONCURRENT_REQUESTS: u32 = 5;
/// Upper bound for `MAX_CONCURRENT_DOWNLOADS`.
pub const MAX_CONCURRENT_DOWNLOADS: u32 = 5;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, failing on garbage instead of falling back.
fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> Result<T, CoreError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.trim().parse().map_err(|_| CoreError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> Result<bool, CoreError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoreError::InvalidValue { key: key.to_string(), value: raw }),
        },
        None => Ok(default),
    }
}

fn check_range(key: &'static str, value: u32, max: u32) -> Result<(), CoreError> {
    if value < 1 || value > max {
        return Err(CoreError::OutOfRange { key, value, min: 1, max });
    }
    Ok(())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub collection: CollectionConfig,
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub feed: FeedConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BINGGO_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, CoreError> {
        let profile = env_or("BINGGO_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, CoreError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let config = Self {
            profile: p.to_string(),
            collection: CollectionConfig::from_env_profiled(p)?,
            storage: StorageConfig::from_env_profiled(p)?,
            download: DownloadConfig::from_env_profiled(p)?,
            feed: FeedConfig::from_env_profiled(p)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.collection.validate()?;
        self.download.validate()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  collection:  market={}, all_markets={}, days={}, resolution={}, max_requests={}",
            self.collection.market,
            self.collection.all_markets,
            self.collection.days,
            self.collection.resolution,
            self.collection.max_concurrent_requests
        );
        tracing::info!(
            "  storage:     url={}, max_connections={}",
            self.storage.database_url,
            self.storage.max_connections
        );
        tracing::info!(
            "  download:    dir={}, max_downloads={}, progress_interval_ms={}",
            self.download.download_dir.display(),
            self.download.max_concurrent_downloads,
            self.download.progress_interval_ms
        );
        tracing::info!(
            "  feed:        archive={}, timeout={}s",
            self.feed.archive_url,
            self.feed.timeout_secs
        );
    }
}

// ── Sub-configs ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub market: MarketCode,
    pub all_markets: bool,
    pub days: u32,
    pub resolution: ResolutionCode,
    pub max_concurrent_requests: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            market: MarketCode::UnitedStates,
            all_markets: false,
            days: 1,
            resolution: ResolutionCode::Uhd4k,
            max_concurrent_requests: 3,
        }
    }
}

impl CollectionConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            market: profiled_env_parse(p, "COLLECT_MARKET", d.market)?,
            all_markets: profiled_env_bool(p, "COLLECT_ALL_MARKETS", d.all_markets)?,
            days: profiled_env_parse(p, "COLLECT_DAYS", d.days)?,
            resolution: profiled_env_parse(p, "COLLECT_RESOLUTION", d.resolution)?,
            max_concurrent_requests: profiled_env_parse(
                p,
                "MAX_CONCURRENT_REQUESTS",
                d.max_concurrent_requests,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        check_range("COLLECT_DAYS", self.days, MAX_HISTORY_DAYS)?;
        check_range(
            "MAX_CONCURRENT_REQUESTS",
            self.max_concurrent_requests,
            MAX_CONCURRENT_REQUESTS,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            database_url: profiled_env_or(p, "DATABASE_URL", "sqlite://binggo.db"),
            max_connections: profiled_env_parse(p, "DB_MAX_CONNECTIONS", 5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub max_concurrent_downloads: u32,
    pub progress_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            max_concurrent_downloads: 3,
            progress_interval_ms: 100,
        }
    }
}

impl DownloadConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            download_dir: PathBuf::from(profiled_env_or(p, "DOWNLOAD_DIR", "./downloads")),
            max_concurrent_downloads: profiled_env_parse(
                p,
                "MAX_CONCURRENT_DOWNLOADS",
                d.max_concurrent_downloads,
            )?,
            progress_interval_ms: profiled_env_parse(
                p,
                "PROGRESS_INTERVAL_MS",
                d.progress_interval_ms,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        check_range(
            "MAX_CONCURRENT_DOWNLOADS",
            self.max_concurrent_downloads,
            MAX_CONCURRENT_DOWNLOADS,
        )
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Prefix for image URLs built from a record's `urlbase`.
    pub base_url: String,
    pub archive_url: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.bing.com".to_string(),
            archive_url: "https://global.bing.com/HPImageArchive.aspx".to_string(),
            timeout_secs: 30,
        }
    }
}

impl FeedConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            base_url: profiled_env_or(p, "FEED_BASE_URL", &d.base_url),
            archive_url: profiled_env_or(p, "FEED_ARCHIVE_URL", &d.archive_url),
            timeout_secs: profiled_env_parse(p, "HTTP_TIMEOUT_SECS", d.timeout_secs)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
