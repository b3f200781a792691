//! Looks up where a queued download comes from and where it should land.

use async_trait::async_trait;
use binggo_core::ResolutionCode;
use binggo_storage::WallpaperRepository;
use uuid::Uuid;

use crate::error::DownloadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub url: String,
    /// Directory label for the market, e.g. `UnitedStates`.
    pub country: String,
    /// Directory label for the day, `YYYY-MM-DD`.
    pub date: String,
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(
        &self,
        wallpaper_id: Uuid,
        resolution: ResolutionCode,
    ) -> Result<DownloadSource, DownloadError>;
}

#[async_trait]
impl SourceResolver for WallpaperRepository {
    async fn resolve(
        &self,
        wallpaper_id: Uuid,
        resolution: ResolutionCode,
    ) -> Result<DownloadSource, DownloadError> {
        let record = self
            .get_by_id(wallpaper_id)
            .await?
            .ok_or(DownloadError::NotFound(wallpaper_id))?;

        let url = record
            .info
            .image_url(resolution)
            .ok_or(DownloadError::UrlUnavailable(resolution))?
            .to_string();

        Ok(DownloadSource {
            url,
            country: record.info.country.clone(),
            date: record.actual_date.format("%Y-%m-%d").to_string(),
        })
    }
}
