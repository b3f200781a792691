//! Binary download client.
//!
//! Files land at `{download_dir}/{country}/{date}/Images/{file_name}`. The
//! body is streamed chunk-by-chunk into a `.part` file that is renamed into
//! place only once the transfer finished with a non-zero size.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use binggo_core::{ResolutionCode, RetryPolicy};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DownloadError;

pub const IMAGES_SUBDIR: &str = "Images";

const ACCEPT_IMAGE: &str = "image/webp,image/apng,image/*,*/*;q=0.8";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Byte counters shared between a transfer and whoever reports on it.
#[derive(Debug, Default)]
pub struct TransferCounters {
    downloaded: AtomicU64,
    /// 0 until the server reports a length.
    total: AtomicU64,
}

impl TransferCounters {
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.downloaded.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub country: String,
    pub date: String,
    pub resolution: ResolutionCode,
    pub download_dir: PathBuf,
}

impl DownloadRequest {
    pub fn target_dir(&self) -> PathBuf {
        self.download_dir
            .join(&self.country)
            .join(&self.date)
            .join(IMAGES_SUBDIR)
    }

    pub fn target_path(&self) -> PathBuf {
        self.target_dir().join(file_name_for(&self.url, self.resolution))
    }
}

#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Stream `request.url` to disk, updating `progress` as bytes arrive.
    /// Returns the final file path.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &TransferCounters,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError>;
}

/// Pick a file name from the URL: the `id` query parameter if present,
/// else the last path segment, else `{resolution}_wallpaper.jpg`.
pub fn file_name_for(url: &str, resolution: ResolutionCode) -> String {
    let fallback = || format!("{}_wallpaper.jpg", resolution.code());
    let Ok(parsed) = Url::parse(url) else {
        return fallback();
    };

    let from_query = parsed
        .query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.into_owned());
    let from_path = || {
        parsed
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .filter(|s| s.contains('.'))
            .map(str::to_string)
    };

    from_query
        .or_else(from_path)
        .map(|name| name.replace(['/', '\\'], "_"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(fallback)
}

fn part_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

pub struct HttpDownloadClient {
    client: Client,
    /// Longest gap allowed between two body chunks.
    stall_timeout: Duration,
    network_retry: RetryPolicy,
    file_retry: RetryPolicy,
}

impl HttpDownloadClient {
    /// `timeout` bounds connecting and every wait for the next body chunk.
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            stall_timeout: timeout,
            network_retry: RetryPolicy::network(),
            file_retry: RetryPolicy::file_io(),
        })
    }

    pub fn with_retry(mut self, network: RetryPolicy, file: RetryPolicy) -> Self {
        self.network_retry = network;
        self.file_retry = file;
        self
    }

    async fn open(&self, url: &str) -> Result<Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_IMAGE)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }
        Ok(response)
    }

    /// One attempt: request the URL and stream the body into `part`.
    /// Counters restart from zero so a retried attempt reports honestly.
    async fn fetch(
        &self,
        url: &str,
        part: &Path,
        progress: &TransferCounters,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        progress.reset();
        let response = self.open(url).await?;

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let ct = content_type.to_str().unwrap_or_default();
            if !ct.starts_with("image/") {
                warn!(url, content_type = %ct, "response is not an image");
            }
        }
        if let Some(len) = response.content_length() {
            progress.set_total(len);
        }

        debug!(url, part = %part.display(), "streaming download");
        self.stream_to_file(response, part, progress, cancel).await
    }

    async fn stream_to_file(
        &self,
        response: Response,
        part: &Path,
        progress: &TransferCounters,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = tokio::time::timeout(self.stall_timeout, stream.next()) => match chunk {
                    Err(_) => return Err(DownloadError::Stalled(self.stall_timeout)),
                    Ok(Some(Ok(bytes))) => {
                        file.write_all(&bytes).await?;
                        written += bytes.len() as u64;
                        progress.add(bytes.len() as u64);
                    }
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(None) => break,
                },
            }
        }

        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl DownloadClient for HttpDownloadClient {
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &TransferCounters,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let dir = request.target_dir();
        let dir_ref = &dir;
        self.file_retry
            .run("create_dir", move || async move {
                tokio::fs::create_dir_all(dir_ref).await.map_err(DownloadError::from)
            })
            .await?;

        let path = request.target_path();
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() > 0 {
                info!(path = %path.display(), "file already exists, skipping download");
                progress.set_total(meta.len());
                progress.add(meta.len());
                return Ok(path);
            }
            warn!(path = %path.display(), "removing empty leftover file");
            tokio::fs::remove_file(&path).await?;
        }

        let url = request.url.as_str();
        let part = part_path(&path);
        let part_ref = part.as_path();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            r = self.network_retry.run("download", move || self.fetch(url, part_ref, progress, cancel)) => r,
        };

        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                progress.reset();
                return Err(e);
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(DownloadError::EmptyFile);
        }

        tokio::fs::rename(&part, &path).await?;
        info!(path = %path.display(), bytes = written, "download complete");
        Ok(path)
    }
}
