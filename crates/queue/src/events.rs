//! Events published by the download queue.
//!
//! Both variants carry a cloned [`DownloadTask`], never a live reference, so
//! a slow subscriber can't observe a task mid-update.

use serde::Serialize;
use uuid::Uuid;

use crate::task::{DownloadStatus, DownloadTask};

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Periodic byte-count update while a task is `InProgress`.
    Progress(DownloadTask),
    /// Exactly one per state change.
    StatusChanged {
        task_id: Uuid,
        old: DownloadStatus,
        new: DownloadStatus,
        task: DownloadTask,
    },
}

impl DownloadEvent {
    pub fn task(&self) -> &DownloadTask {
        match self {
            Self::Progress(task) => task,
            Self::StatusChanged { task, .. } => task,
        }
    }
}
