//! Bounded, cancellable download queue.
//!
//! [`DownloadManager`] accepts `(wallpaper id, resolution)` requests, runs
//! each as its own tokio task behind a fixed-width semaphore, and publishes
//! [`DownloadEvent`]s carrying immutable task snapshots.

pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod resolver;
pub mod task;

pub use client::{DownloadClient, DownloadRequest, HttpDownloadClient, TransferCounters};
pub use error::DownloadError;
pub use events::DownloadEvent;
pub use manager::DownloadManager;
pub use resolver::{DownloadSource, SourceResolver};
pub use task::{DownloadKey, DownloadStatus, DownloadTask};
