//! Download error types.

use std::time::Duration;

use binggo_core::{ResolutionCode, Transient};
use binggo_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no data received for {0:?}")]
    Stalled(Duration),

    #[error("downloaded file is empty")]
    EmptyFile,

    #[error("wallpaper not found: {0}")]
    NotFound(Uuid),

    #[error("no {0} image URL for this wallpaper")]
    UrlUnavailable(ResolutionCode),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("download cancelled")]
    Cancelled,
}

impl Transient for DownloadError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .map(|s| is_retryable_status(s.as_u16()))
                        .unwrap_or(false)
            }
            Self::Status(code) => is_retryable_status(*code),
            Self::Stalled(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Self::Storage(e) => e.is_transient(),
            Self::EmptyFile | Self::NotFound(_) | Self::UrlUnavailable(_) | Self::Cancelled => false,
        }
    }
}

fn is_retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}
