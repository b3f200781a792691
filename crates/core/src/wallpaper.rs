//! Wallpaper data model: raw feed records, collected events, and the
//! persisted metadata blob.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::MarketCode;
use crate::resolution::ResolutionCode;

/// Compact date format used by the feed (`20250131`).
pub const FEED_DATE_FORMAT: &str = "%Y%m%d";
/// Compact date-time format used by the feed (`202501311600`).
pub const FEED_DATE_TIME_FORMAT: &str = "%Y%m%d%H%M";

// ── Raw feed record ───────────────────────────────────────────

/// One image record as returned by the archive feed.
///
/// Fields are kept as the feed sends them; parsing happens at mapping time
/// so that a single malformed record never fails the whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BingImage {
    pub url: String,
    #[serde(rename = "urlbase")]
    pub url_base: String,
    pub copyright: String,
    #[serde(rename = "copyrightonly")]
    pub copyright_only: String,
    #[serde(rename = "copyrightlink")]
    pub copyright_link: String,
    pub title: String,
    #[serde(rename = "bsTitle")]
    pub bs_title: String,
    pub caption: String,
    pub desc: String,
    pub quiz: String,
    pub wp: bool,
    #[serde(rename = "hsh")]
    pub hash: String,
    pub drk: i32,
    pub top: i32,
    pub bot: i32,
    pub hs: Vec<serde_json::Value>,
    #[serde(rename = "startdate")]
    pub start_date: String,
    #[serde(rename = "fullstartdate")]
    pub full_start_date: String,
    #[serde(rename = "enddate")]
    pub end_date: String,
    pub date: String,
}

impl BingImage {
    pub fn parsed_start_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.start_date, FEED_DATE_FORMAT).ok()
    }

    pub fn parsed_end_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.end_date, FEED_DATE_FORMAT).ok()
    }

    pub fn parsed_full_start(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.full_start_date, FEED_DATE_TIME_FORMAT).ok()
    }
}

/// Envelope of an archive feed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedResponse {
    pub images: Vec<BingImage>,
}

// ── Collected event ───────────────────────────────────────────

/// A raw record tagged with where and when it was collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedEvent {
    pub market: MarketCode,
    pub resolution: ResolutionCode,
    pub collected_at: DateTime<Utc>,
    pub record: BingImage,
}

// ── Persisted metadata blob ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResolution {
    pub resolution: ResolutionCode,
    pub url: String,
    /// `WxH`.
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub start_date: NaiveDate,
    pub full_start_date_time: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDate>,
}

/// Metadata stored as JSON alongside each wallpaper row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallpaperInfo {
    pub date: String,
    pub country: String,
    pub market_code: String,
    pub title: String,
    pub bs_title: String,
    pub caption: String,
    pub copyright: String,
    pub copyright_only: String,
    pub copyright_link: String,
    pub description: String,
    pub quiz: String,
    pub hash: String,
    pub image_resolutions: Vec<ImageResolution>,
    pub time_info: TimeInfo,
    pub created_at: DateTime<Utc>,
    pub original_url_base: String,
}

impl WallpaperInfo {
    pub fn image_url(&self, resolution: ResolutionCode) -> Option<&str> {
        self.image_resolutions
            .iter()
            .find(|r| r.resolution == resolution)
            .map(|r| r.url.as_str())
    }
}

// ── Rows ──────────────────────────────────────────────────────

/// A row ready for dedup-insert. The natural key is
/// `(market, resolution, hash)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWallpaper {
    pub market: MarketCode,
    pub resolution: ResolutionCode,
    pub hash: String,
    pub actual_date: NaiveDate,
    pub info: WallpaperInfo,
}

impl NewWallpaper {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            market: self.market,
            resolution: self.resolution,
            hash: self.hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub market: MarketCode,
    pub resolution: ResolutionCode,
    pub hash: String,
}

/// A persisted wallpaper row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallpaperRecord {
    pub id: Uuid,
    pub market: MarketCode,
    pub resolution: ResolutionCode,
    pub hash: String,
    pub actual_date: NaiveDate,
    pub info: WallpaperInfo,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feed_record() {
        let json = r#"{
            "images": [{
                "startdate": "20250131",
                "fullstartdate": "202501311600",
                "enddate": "20250201",
                "url": "/th?id=OHR.Foo_EN-US123_1920x1080.jpg",
                "urlbase": "/th?id=OHR.Foo_EN-US123",
                "copyright": "Foo (© Bar)",
                "title": "Foo",
                "hsh": "abc123",
                "wp": true,
                "drk": 1,
                "hs": []
            }]
        }"#;
        let resp: FeedResponse = serde_json::from_str(json).unwrap();
        let img = &resp.images[0];
        assert_eq!(img.url_base, "/th?id=OHR.Foo_EN-US123");
        assert_eq!(img.hash, "abc123");
        assert_eq!(img.parsed_start_date(), NaiveDate::from_ymd_opt(2025, 1, 31));
        assert!(img.parsed_full_start().is_some());
        assert!(img.caption.is_empty());
    }

    #[test]
    fn bad_start_date_is_none() {
        let img = BingImage { start_date: "2025-01-31".into(), ..Default::default() };
        assert!(img.parsed_start_date().is_none());
    }
}
