//! Download task model and lifecycle.

use std::path::PathBuf;

use binggo_core::ResolutionCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// `Waiting -> InProgress -> {Completed | Failed | Canceled}`.
/// A `Waiting` task may also go straight to `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Waiting,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// `Waiting` or `InProgress`.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Waiting, InProgress)
                | (Waiting, Failed)
                | (Waiting, Canceled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Canceled)
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Logical key used to reject duplicate in-flight submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadKey {
    pub wallpaper_id: Uuid,
    pub resolution: ResolutionCode,
}

/// Snapshot of one download. Observers only ever see clones of this.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub id: Uuid,
    pub wallpaper_id: Uuid,
    pub resolution: ResolutionCode,
    pub status: DownloadStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub progress_percent: f64,
    /// Average throughput since the transfer started.
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadTask {
    pub(crate) fn new(wallpaper_id: Uuid, resolution: ResolutionCode) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallpaper_id,
            resolution,
            status: DownloadStatus::Waiting,
            downloaded_bytes: 0,
            total_bytes: None,
            progress_percent: 0.0,
            bytes_per_second: 0.0,
            eta_seconds: None,
            file_path: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn key(&self) -> DownloadKey {
        DownloadKey { wallpaper_id: self.wallpaper_id, resolution: self.resolution }
    }

    /// Recompute percentage, speed and ETA from raw byte counts.
    pub(crate) fn update_progress(&mut self, downloaded: u64, total: Option<u64>, elapsed_secs: f64) {
        self.downloaded_bytes = downloaded;
        self.total_bytes = total;
        self.bytes_per_second = if elapsed_secs > 0.0 { downloaded as f64 / elapsed_secs } else { 0.0 };
        match total {
            Some(total) if total > 0 => {
                self.progress_percent = (downloaded as f64 / total as f64 * 100.0).min(100.0);
                self.eta_seconds = if self.bytes_per_second > 0.0 {
                    let remaining = total.saturating_sub(downloaded) as f64;
                    Some((remaining / self.bytes_per_second).ceil() as u64)
                } else {
                    None
                };
            }
            _ => {
                self.progress_percent = 0.0;
                self.eta_seconds = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DownloadStatus::*;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Completed, Failed, Canceled] {
            for next in [Waiting, InProgress, Completed, Failed, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!InProgress.can_transition_to(Waiting));
        assert!(!Waiting.can_transition_to(Completed));
    }

    #[test]
    fn progress_math() {
        let mut t = DownloadTask::new(Uuid::new_v4(), ResolutionCode::Hd);
        t.update_progress(250, Some(1000), 2.0);
        assert_eq!(t.progress_percent, 25.0);
        assert_eq!(t.bytes_per_second, 125.0);
        assert_eq!(t.eta_seconds, Some(6));

        t.update_progress(10, None, 1.0);
        assert_eq!(t.progress_percent, 0.0);
        assert_eq!(t.eta_seconds, None);
    }
}
