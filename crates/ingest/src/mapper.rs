//! Collected event → storage row.

use binggo_core::{
    CollectedEvent, CoreError, ImageResolution, NewWallpaper, ResolutionCode, TimeInfo,
    WallpaperInfo,
};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Build the row for one event. Records without a `urlbase`, a hash, a title
/// or a parsable start date are rejected.
pub fn to_new_wallpaper(
    event: &CollectedEvent,
    base_url: &str,
    now: DateTime<Utc>,
) -> Result<NewWallpaper, CoreError> {
    let record = &event.record;
    if record.url_base.trim().is_empty() {
        return Err(CoreError::InvalidRecord("missing urlbase".to_string()));
    }
    if record.hash.trim().is_empty() {
        return Err(CoreError::InvalidRecord(format!(
            "missing hash for {}",
            record.url_base
        )));
    }
    if record.title.trim().is_empty() {
        return Err(CoreError::InvalidRecord(format!(
            "missing title for {}",
            record.url_base
        )));
    }
    let start_date = record.parsed_start_date().ok_or_else(|| {
        CoreError::InvalidRecord(format!("bad start date '{}'", record.start_date))
    })?;

    let image_resolutions = ResolutionCode::ALL
        .into_iter()
        .map(|resolution| ImageResolution {
            resolution,
            url: format!(
                "{}{}{}",
                base_url.trim_end_matches('/'),
                record.url_base,
                resolution.suffix()
            ),
            size: resolution.size(),
        })
        .collect();

    let info = WallpaperInfo {
        date: record.date.clone(),
        country: event.market.name().to_string(),
        market_code: event.market.code().to_string(),
        title: record.title.clone(),
        bs_title: record.bs_title.clone(),
        caption: record.caption.clone(),
        copyright: record.copyright.clone(),
        copyright_only: record.copyright_only.clone(),
        copyright_link: record.copyright_link.clone(),
        description: record.desc.clone(),
        quiz: record.quiz.clone(),
        hash: record.hash.clone(),
        image_resolutions,
        time_info: TimeInfo {
            start_date,
            full_start_date_time: record.parsed_full_start(),
            end_date: record.parsed_end_date(),
        },
        created_at: now,
        original_url_base: record.url_base.clone(),
    };

    Ok(NewWallpaper {
        market: event.market,
        resolution: event.resolution,
        hash: record.hash.clone(),
        actual_date: start_date,
        info,
    })
}

/// Map every valid event; invalid ones are logged and dropped.
pub fn to_new_wallpapers(events: &[CollectedEvent], base_url: &str) -> Vec<NewWallpaper> {
    let now = Utc::now();
    events
        .iter()
        .filter_map(|event| match to_new_wallpaper(event, base_url, now) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(market = %event.market, hash = %event.record.hash, error = %e, "skipping record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use binggo_core::{BingImage, MarketCode};
    use chrono::NaiveDate;

    fn event(record: BingImage) -> CollectedEvent {
        CollectedEvent {
            market: MarketCode::UnitedStates,
            resolution: ResolutionCode::Uhd4k,
            collected_at: Utc::now(),
            record,
        }
    }

    fn record() -> BingImage {
        BingImage {
            url_base: "/th?id=OHR.Foo_EN-US123".into(),
            title: "Foo".into(),
            hash: "abc".into(),
            start_date: "20250131".into(),
            end_date: "20250201".into(),
            ..Default::default()
        }
    }

    #[test]
    fn maps_urls_for_every_resolution() {
        let row = to_new_wallpaper(&event(record()), "https://www.bing.com/", Utc::now()).unwrap();
        assert_eq!(row.actual_date, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
        assert_eq!(row.info.image_resolutions.len(), ResolutionCode::ALL.len());
        assert_eq!(
            row.info.image_url(ResolutionCode::Uhd4k),
            Some("https://www.bing.com/th?id=OHR.Foo_EN-US123_UHD.jpg")
        );
        assert_eq!(row.info.country, "UnitedStates");
        assert_eq!(row.info.market_code, "en-US");
        assert_eq!(row.info.time_info.end_date, NaiveDate::from_ymd_opt(2025, 2, 1));
    }

    #[test]
    fn rejects_incomplete_records() {
        let no_title = BingImage { title: String::new(), ..record() };
        let bad_date = BingImage { start_date: "soon".into(), ..record() };
        let no_base = BingImage { url_base: String::new(), ..record() };
        let no_hash = BingImage { hash: String::new(), ..record() };
        for r in [no_title, bad_date, no_base, no_hash] {
            assert!(to_new_wallpaper(&event(r), "https://www.bing.com", Utc::now()).is_err());
        }
    }

    #[test]
    fn batch_drops_invalid() {
        let events = vec![event(record()), event(BingImage::default())];
        assert_eq!(to_new_wallpapers(&events, "https://www.bing.com").len(), 1);
    }
}
