//! Download queue manager.
//!
//! The task table and the in-flight key index live behind one mutex so they
//! can never disagree. Every status change goes through [`Inner::transition`],
//! which checks the state machine, updates the table and the index, and
//! publishes a [`DownloadEvent::StatusChanged`] before releasing the lock.
//! That makes transitions for a single task strictly ordered for observers.
//!
//! Workers run as independent tokio tasks. Each one waits for a semaphore
//! slot, resolves its source URL, and streams the file while a ticker
//! publishes progress snapshots at a fixed interval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use binggo_core::config::DownloadConfig;
use binggo_core::{CoreError, ResolutionCode};
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{DownloadClient, DownloadRequest, TransferCounters};
use crate::error::DownloadError;
use crate::events::{DownloadEvent, EVENT_CHANNEL_CAPACITY};
use crate::resolver::SourceResolver;
use crate::task::{DownloadKey, DownloadStatus, DownloadTask};

// ── Shared state ─────────────────────────────────────────────

struct TaskEntry {
    task: DownloadTask,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    /// Insertion-ordered so listing is stable.
    tasks: IndexMap<Uuid, TaskEntry>,
    /// In-flight tasks only.
    index: HashMap<DownloadKey, Uuid>,
}

struct Inner {
    state: Mutex<QueueState>,
    semaphore: Arc<Semaphore>,
    client: Arc<dyn DownloadClient>,
    resolver: Arc<dyn SourceResolver>,
    events: broadcast::Sender<DownloadEvent>,
    download_dir: RwLock<PathBuf>,
    progress_interval: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn download_dir(&self) -> PathBuf {
        self.download_dir
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `old -> next` if the state machine allows it. Returns `false`
    /// (and changes nothing) for unknown ids or illegal transitions.
    fn transition(
        &self,
        state: &mut QueueState,
        id: Uuid,
        next: DownloadStatus,
        update: impl FnOnce(&mut DownloadTask),
    ) -> bool {
        let Some(entry) = state.tasks.get_mut(&id) else {
            return false;
        };
        let old = entry.task.status;
        if !old.can_transition_to(next) {
            debug!(task_id = %id, from = %old, to = %next, "transition refused");
            return false;
        }

        entry.task.status = next;
        if next.is_terminal() {
            entry.task.completed_at = Some(Utc::now());
        }
        update(&mut entry.task);
        let snapshot = entry.task.clone();

        if next.is_terminal() {
            let key = snapshot.key();
            if state.index.get(&key) == Some(&id) {
                state.index.remove(&key);
            }
        }

        // No receivers is fine.
        let _ = self.events.send(DownloadEvent::StatusChanged {
            task_id: id,
            old,
            new: next,
            task: snapshot,
        });
        true
    }

    fn transition_now(
        &self,
        id: Uuid,
        next: DownloadStatus,
        update: impl FnOnce(&mut DownloadTask),
    ) -> bool {
        let mut state = self.lock();
        self.transition(&mut state, id, next, update)
    }

    /// Cancel the task's scope and, if still in flight, force `Canceled`.
    fn cancel_locked(&self, state: &mut QueueState, id: Uuid) -> bool {
        let Some(entry) = state.tasks.get(&id) else {
            return false;
        };
        entry.cancel.cancel();
        self.transition(state, id, DownloadStatus::Canceled, |_| {})
    }

    fn publish_progress(&self, id: Uuid, counters: &TransferCounters, started: Instant) {
        let mut state = self.lock();
        let Some(entry) = state.tasks.get_mut(&id) else {
            return;
        };
        if entry.task.status != DownloadStatus::InProgress {
            return;
        }
        entry.task.update_progress(
            counters.downloaded(),
            counters.total(),
            started.elapsed().as_secs_f64(),
        );
        let _ = self.events.send(DownloadEvent::Progress(entry.task.clone()));
    }
}

// ── Manager ──────────────────────────────────────────────────

/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        config: &DownloadConfig,
        client: Arc<dyn DownloadClient>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads as usize)),
                client,
                resolver,
                events,
                download_dir: RwLock::new(config.download_dir.clone()),
                progress_interval: config.progress_interval(),
            }),
        })
    }

    /// Queue a download, or return the id of the in-flight task already
    /// holding `(wallpaper_id, resolution)`.
    ///
    /// Must be called from within a tokio runtime; the worker is spawned
    /// immediately and this call never waits on it.
    pub fn submit(&self, wallpaper_id: Uuid, resolution: ResolutionCode) -> Uuid {
        let key = DownloadKey { wallpaper_id, resolution };
        let task = DownloadTask::new(wallpaper_id, resolution);
        let id = task.id;
        let cancel = CancellationToken::new();

        {
            let mut state = self.inner.lock();
            if let Some(existing) = state.index.get(&key) {
                debug!(task_id = %existing, wallpaper_id = %wallpaper_id, "download already in flight");
                return *existing;
            }
            state.index.insert(key, id);
            state.tasks.insert(id, TaskEntry { task, cancel: cancel.clone() });
        }

        info!(task_id = %id, wallpaper_id = %wallpaper_id, resolution = %resolution, "download queued");
        let inner = self.inner.clone();
        tokio::spawn(run_task(inner, id, key, cancel));
        id
    }

    /// Cancel a task. Returns `true` if it moved to `Canceled`.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let mut state = self.inner.lock();
        let canceled = self.inner.cancel_locked(&mut state, task_id);
        if canceled {
            info!(task_id = %task_id, "download canceled");
        }
        canceled
    }

    /// Cancel if in flight, then forget the task. Unknown ids are a no-op.
    pub fn delete(&self, task_id: Uuid) {
        let mut state = self.inner.lock();
        self.inner.cancel_locked(&mut state, task_id);
        if let Some(entry) = state.tasks.shift_remove(&task_id) {
            let key = entry.task.key();
            if state.index.get(&key) == Some(&task_id) {
                state.index.remove(&key);
            }
            debug!(task_id = %task_id, "download deleted");
        }
    }

    /// Cancel everything in flight and empty the table and index.
    pub fn clear_all(&self) {
        let mut state = self.inner.lock();
        let ids: Vec<Uuid> = state.tasks.keys().copied().collect();
        for id in &ids {
            self.inner.cancel_locked(&mut state, *id);
        }
        state.tasks.clear();
        state.index.clear();
        info!(cleared = ids.len(), "download queue cleared");
    }

    pub fn get(&self, task_id: Uuid) -> Option<DownloadTask> {
        self.inner.lock().tasks.get(&task_id).map(|e| e.task.clone())
    }

    /// All known tasks, newest first.
    pub fn list(&self) -> Vec<DownloadTask> {
        self.inner
            .lock()
            .tasks
            .values()
            .rev()
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.inner.download_dir()
    }

    /// Change where future downloads land, creating the directory.
    pub async fn set_download_dir(&self, dir: &Path) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut guard = self
            .inner
            .download_dir
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = dir.to_path_buf();
        info!(dir = %dir.display(), "download directory changed");
        Ok(())
    }
}

// ── Worker ───────────────────────────────────────────────────

async fn run_task(inner: Arc<Inner>, id: Uuid, key: DownloadKey, cancel: CancellationToken) {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => {
            inner.transition_now(id, DownloadStatus::Canceled, |_| {});
            return;
        }
        permit = inner.semaphore.clone().acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                inner.transition_now(id, DownloadStatus::Failed, |t| {
                    t.error = Some("download queue closed".to_string());
                });
                return;
            }
        },
    };

    if !inner.transition_now(id, DownloadStatus::InProgress, |t| t.started_at = Some(Utc::now())) {
        // Canceled or deleted while waiting for a slot.
        return;
    }

    let counters = TransferCounters::default();
    match execute(&inner, id, key, &counters, &cancel).await {
        Ok(path) => {
            let downloaded = counters.downloaded();
            let total = counters.total().or(Some(downloaded));
            let completed = inner.transition_now(id, DownloadStatus::Completed, |t| {
                t.downloaded_bytes = downloaded;
                t.total_bytes = total;
                t.progress_percent = 100.0;
                t.eta_seconds = Some(0);
                t.file_path = Some(path.clone());
            });
            if completed {
                info!(task_id = %id, path = %path.display(), bytes = downloaded, "download finished");
            } else {
                // Canceled or deleted while the transfer was wrapping up.
                debug!(task_id = %id, path = %path.display(), "completion discarded");
            }
        }
        Err(DownloadError::Cancelled) => {
            inner.transition_now(id, DownloadStatus::Canceled, |_| {});
        }
        Err(e) => {
            let message = e.to_string();
            warn!(task_id = %id, wallpaper_id = %key.wallpaper_id, error = %message, "download failed");
            inner.transition_now(id, DownloadStatus::Failed, |t| t.error = Some(message));
        }
    }
}

async fn execute(
    inner: &Inner,
    id: Uuid,
    key: DownloadKey,
    counters: &TransferCounters,
    cancel: &CancellationToken,
) -> Result<PathBuf, DownloadError> {
    let source = tokio::select! {
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        s = inner.resolver.resolve(key.wallpaper_id, key.resolution) => s?,
    };

    let request = DownloadRequest {
        url: source.url,
        country: source.country,
        date: source.date,
        resolution: key.resolution,
        download_dir: inner.download_dir(),
    };

    let started = Instant::now();
    let mut ticker = tokio::time::interval(inner.progress_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let download = inner.client.download(&request, counters, cancel);
    tokio::pin!(download);

    let result = loop {
        tokio::select! {
            r = &mut download => break r,
            _ = ticker.tick() => inner.publish_progress(id, counters, started),
        }
    };

    if result.is_ok() {
        inner.publish_progress(id, counters, started);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use binggo_core::config::MAX_CONCURRENT_DOWNLOADS;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::resolver::DownloadSource;

    struct FixedResolver;

    #[async_trait]
    impl SourceResolver for FixedResolver {
        async fn resolve(
            &self,
            wallpaper_id: Uuid,
            _resolution: ResolutionCode,
        ) -> Result<DownloadSource, DownloadError> {
            Ok(DownloadSource {
                url: format!("https://img.example.com/{wallpaper_id}.jpg"),
                country: "UnitedStates".into(),
                date: "2025-01-01".into(),
            })
        }
    }

    /// Blocks until `release` fires (or cancellation), then "writes" 1000
    /// bytes in 4 chunks.
    struct GatedClient {
        release: CancellationToken,
        started: Arc<AtomicUsize>,
        fail: bool,
    }

    impl GatedClient {
        fn new(fail: bool) -> Self {
            Self { release: CancellationToken::new(), started: Arc::new(AtomicUsize::new(0)), fail }
        }
    }

    #[async_trait]
    impl DownloadClient for GatedClient {
        async fn download(
            &self,
            request: &DownloadRequest,
            progress: &TransferCounters,
            cancel: &CancellationToken,
        ) -> Result<PathBuf, DownloadError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            progress.set_total(1000);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = self.release.cancelled() => {}
            }
            if self.fail {
                return Err(DownloadError::Status(404));
            }
            for _ in 0..4 {
                progress.add(250);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(request.target_path())
        }
    }

    /// Finishes its I/O, then has the task canceled before handing the path
    /// back, so the worker sees `Ok` for a task that is already terminal.
    struct CancelAfterIoClient {
        release: CancellationToken,
        target: Arc<Mutex<Option<(DownloadManager, Uuid)>>>,
    }

    #[async_trait]
    impl DownloadClient for CancelAfterIoClient {
        async fn download(
            &self,
            request: &DownloadRequest,
            progress: &TransferCounters,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf, DownloadError> {
            progress.set_total(1000);
            self.release.cancelled().await;
            progress.add(1000);
            let target = self.target.lock().unwrap().take();
            if let Some((manager, id)) = target {
                assert!(manager.cancel(id));
            }
            Ok(request.target_path())
        }
    }

    fn config(max: u32) -> DownloadConfig {
        DownloadConfig {
            download_dir: PathBuf::from("/tmp/binggo-test"),
            max_concurrent_downloads: max,
            progress_interval_ms: 1,
        }
    }

    fn manager(client: GatedClient, max: u32) -> DownloadManager {
        DownloadManager::new(&config(max), Arc::new(client), Arc::new(FixedResolver)).unwrap()
    }

    async fn wait_for(m: &DownloadManager, id: Uuid, status: DownloadStatus) -> DownloadTask {
        for _ in 0..500 {
            if let Some(t) = m.get(id) {
                if t.status == status {
                    return t;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("task {id} never reached {status}");
    }

    #[tokio::test]
    async fn duplicate_in_flight_submission_returns_same_id() {
        let client = GatedClient::new(false);
        let release = client.release.clone();
        let m = manager(client, 2);
        let wp = Uuid::new_v4();

        let a = m.submit(wp, ResolutionCode::Uhd4k);
        let b = m.submit(wp, ResolutionCode::Uhd4k);
        assert_eq!(a, b);
        assert_eq!(m.list().len(), 1);

        // Different resolution is a different key.
        let c = m.submit(wp, ResolutionCode::Hd);
        assert_ne!(a, c);

        wait_for(&m, a, DownloadStatus::InProgress).await;
        release.cancel();
        let done = wait_for(&m, a, DownloadStatus::Completed).await;
        assert_eq!(done.downloaded_bytes, 1000);
        assert_eq!(done.progress_percent, 100.0);
        assert!(done.file_path.is_some());
    }

    #[tokio::test]
    async fn resubmission_after_terminal_creates_new_task() {
        let client = GatedClient::new(true);
        let release = client.release.clone();
        let m = manager(client, 1);
        let wp = Uuid::new_v4();

        let first = m.submit(wp, ResolutionCode::Uhd4k);
        wait_for(&m, first, DownloadStatus::InProgress).await;
        release.cancel();
        let failed = wait_for(&m, first, DownloadStatus::Failed).await;
        assert!(failed.error.unwrap().contains("404"));

        let second = m.submit(wp, ResolutionCode::Uhd4k);
        assert_ne!(first, second);
        assert_eq!(m.list()[0].id, second);
    }

    #[tokio::test]
    async fn cancel_is_deterministic_for_waiting_and_in_progress() {
        let client = GatedClient::new(false);
        let started = client.started.clone();
        let m = manager(client, 1);

        let running = m.submit(Uuid::new_v4(), ResolutionCode::Uhd4k);
        wait_for(&m, running, DownloadStatus::InProgress).await;
        // Only one slot, so this one stays Waiting.
        let waiting = m.submit(Uuid::new_v4(), ResolutionCode::Uhd4k);
        assert_eq!(m.get(waiting).unwrap().status, DownloadStatus::Waiting);

        assert!(m.cancel(waiting));
        assert!(m.cancel(running));
        assert_eq!(m.get(waiting).unwrap().status, DownloadStatus::Canceled);
        assert_eq!(m.get(running).unwrap().status, DownloadStatus::Canceled);

        // Worker noticing the cancel later must not change the outcome.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(m.get(running).unwrap().status, DownloadStatus::Canceled);
        assert!(started.load(Ordering::SeqCst) <= 1);
        assert!(!m.cancel(running));
    }

    #[tokio::test]
    async fn cancel_after_io_finished_still_ends_canceled() {
        let release = CancellationToken::new();
        let target = Arc::new(Mutex::new(None));
        let client = CancelAfterIoClient { release: release.clone(), target: target.clone() };
        let m = DownloadManager::new(&config(1), Arc::new(client), Arc::new(FixedResolver)).unwrap();
        let mut rx = m.subscribe();

        let id = m.submit(Uuid::new_v4(), ResolutionCode::Uhd4k);
        wait_for(&m, id, DownloadStatus::InProgress).await;
        *target.lock().unwrap() = Some((m.clone(), id));
        release.cancel();

        let canceled = wait_for(&m, id, DownloadStatus::Canceled).await;
        // Let the worker try to record its completion.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let task = m.get(id).unwrap();
        assert_eq!(task.status, DownloadStatus::Canceled);
        assert!(task.file_path.is_none());
        assert_eq!(task.completed_at, canceled.completed_at);

        let mut terminal = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DownloadEvent::StatusChanged { new, .. } = event {
                if new.is_terminal() {
                    terminal.push(new);
                }
            }
        }
        assert_eq!(terminal, vec![DownloadStatus::Canceled]);
    }

    #[tokio::test]
    async fn status_events_are_ordered_snapshots() {
        let client = GatedClient::new(false);
        let release = client.release.clone();
        let m = manager(client, 1);
        let mut rx = m.subscribe();

        let id = m.submit(Uuid::new_v4(), ResolutionCode::FullHd);
        wait_for(&m, id, DownloadStatus::InProgress).await;
        release.cancel();
        wait_for(&m, id, DownloadStatus::Completed).await;

        let mut transitions = Vec::new();
        let mut progress_seen = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DownloadEvent::StatusChanged { old, new, task, .. } => {
                    assert_eq!(task.status, new);
                    transitions.push((old, new));
                }
                DownloadEvent::Progress(task) => {
                    assert_eq!(task.status, DownloadStatus::InProgress);
                    progress_seen += 1;
                }
            }
        }
        assert_eq!(
            transitions,
            vec![
                (DownloadStatus::Waiting, DownloadStatus::InProgress),
                (DownloadStatus::InProgress, DownloadStatus::Completed),
            ]
        );
        assert!(progress_seen >= 1);
    }

    #[tokio::test]
    async fn delete_and_clear_all() {
        let m = manager(GatedClient::new(false), 1);
        let a = m.submit(Uuid::new_v4(), ResolutionCode::Uhd4k);
        let b = m.submit(Uuid::new_v4(), ResolutionCode::Uhd4k);

        m.delete(a);
        m.delete(Uuid::new_v4());
        assert!(m.get(a).is_none());
        assert_eq!(m.list().len(), 1);

        m.clear_all();
        assert!(m.list().is_empty());
        assert!(m.get(b).is_none());

        // Key is free again.
        let wp = Uuid::new_v4();
        let c = m.submit(wp, ResolutionCode::Uhd4k);
        m.clear_all();
        assert_ne!(m.submit(wp, ResolutionCode::Uhd4k), c);
    }

    #[tokio::test]
    async fn set_download_dir_creates_directory() {
        let m = manager(GatedClient::new(false), 1);
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("wallpapers");
        m.set_download_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(m.download_dir(), dir);
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let r = DownloadManager::new(
            &config(MAX_CONCURRENT_DOWNLOADS + 1),
            Arc::new(GatedClient::new(false)),
            Arc::new(FixedResolver),
        );
        assert!(r.is_err());
    }
}
