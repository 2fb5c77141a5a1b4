use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CleanerError, CleanerResult};

pub type OperationId = String;

/// Capacity of every progress queue in the crate.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 100;

/// Per-step observer for callers that drive an operation directly.
pub type ProgressCallback<'a, T> = &'a (dyn Fn(&T) + Send + Sync);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Cancelled | OperationStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Scan,
    Backup,
    Deletion,
    Restore,
}

impl OperationKind {
    fn prefix(self) -> &'static str {
        match self {
            OperationKind::Scan => "scan",
            OperationKind::Backup => "backup",
            OperationKind::Deletion => "deletion",
            OperationKind::Restore => "restore",
        }
    }
}

/// Bounded, non-blocking progress fan-out.
///
/// `publish` never waits. Updates sent with no subscriber are discarded, and a
/// subscriber that falls more than the capacity behind skips the oldest
/// buffered updates (its next `recv` reports `Lagged`).
#[derive(Debug, Clone)]
pub struct ProgressQueue<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> ProgressQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ProgressQueue { sender }
    }

    pub fn publish(&self, update: T) {
        let _ = self.sender.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone> Default for ProgressQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

/// At most one operation of a kind per component instance.
#[derive(Debug, Clone)]
pub struct InFlight {
    operation: &'static str,
    flag: Arc<AtomicBool>,
}

impl InFlight {
    pub fn new(operation: &'static str) -> Self {
        InFlight {
            operation,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_begin(&self) -> CleanerResult<InFlightGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CleanerError::AlreadyInProgress(self.operation))?;
        Ok(InFlightGuard {
            flag: Arc::clone(&self.flag),
        })
    }

    pub fn is_active(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Holds the token of the operation currently running on a component.
#[derive(Debug, Default)]
pub struct CancelSlot {
    current: Mutex<Option<CancellationToken>>,
}

impl CancelSlot {
    pub fn arm(&self, parent: Option<&CancellationToken>) -> CancellationToken {
        let token = parent.map(CancellationToken::child_token).unwrap_or_default();
        *self.lock() = Some(token.clone());
        token
    }

    pub fn disarm(&self) {
        *self.lock() = None;
    }

    /// Signal the running operation, if any. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Average time per finished item times the items left.
pub fn estimate_remaining(elapsed: Duration, done: u64, total: u64) -> Option<Duration> {
    if done == 0 || total == 0 {
        return None;
    }
    let remaining = total.saturating_sub(done);
    let per_item = elapsed.as_secs_f64() / done as f64;
    Some(Duration::from_secs_f64(per_item * remaining as f64))
}

pub(crate) fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

// Simple throughput helper to compute per-tick metrics
#[derive(Debug, Default, Clone)]
pub struct ThroughputTracker {
    last_tick: Option<Instant>,
    last_files: u64,
    last_bytes: u64,
}

impl ThroughputTracker {
    /// Returns `(files_per_s, mb_per_s)` since the previous tick.
    pub fn tick(&mut self, files_done: u64, bytes_done: u64) -> (Option<f32>, Option<f32>) {
        let now = Instant::now();
        let rates = self.last_tick.map(|prev| {
            let dt = now.duration_since(prev).as_secs_f32().max(0.001);
            let df = files_done.saturating_sub(self.last_files) as f32;
            let db = bytes_done.saturating_sub(self.last_bytes) as f32;
            (df / dt, (db / 1_048_576.0) / dt)
        });
        self.last_tick = Some(now);
        self.last_files = files_done;
        self.last_bytes = bytes_done;
        match rates {
            Some((files, mb)) => (Some(files), Some(mb)),
            None => (None, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub stage: String,
    pub message: String,
    pub current_file: Option<String>,
    pub files_processed: u64,
    pub total_files: u64,
    pub current_size: u64,
    pub total_size: u64,
    pub progress: f32,
    pub backup_progress: f32,
    pub deletion_progress: f32,
    pub elapsed_ms: u64,
    pub eta_ms: Option<u64>,
    pub files_per_s: Option<f32>,
    pub mb_per_s: Option<f32>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct TrackerState {
    snapshot: ProgressSnapshot,
    throughput: ThroughputTracker,
    finished: Option<Instant>,
}

pub struct ProgressTracker {
    id: OperationId,
    started: Instant,
    token: CancellationToken,
    state: Mutex<TrackerState>,
    updates: ProgressQueue<ProgressSnapshot>,
}

impl ProgressTracker {
    /// A tracker not registered with any manager.
    pub fn detached(kind: OperationKind) -> Self {
        let id = format!("{}_{}", kind.prefix(), uuid::Uuid::new_v4());
        Self::with_id(id, kind)
    }

    fn with_id(id: OperationId, kind: OperationKind) -> Self {
        let now = Utc::now();
        let snapshot = ProgressSnapshot {
            operation_id: id.clone(),
            kind,
            status: OperationStatus::Pending,
            stage: "initializing".into(),
            message: "Operation starting...".into(),
            current_file: None,
            files_processed: 0,
            total_files: 0,
            current_size: 0,
            total_size: 0,
            progress: 0.0,
            backup_progress: 0.0,
            deletion_progress: 0.0,
            elapsed_ms: 0,
            eta_ms: None,
            files_per_s: None,
            mb_per_s: None,
            error: None,
            started_at: now,
            updated_at: now,
        };
        ProgressTracker {
            id,
            started: Instant::now(),
            token: CancellationToken::new(),
            state: Mutex::new(TrackerState {
                snapshot,
                throughput: ThroughputTracker::default(),
                finished: None,
            }),
            updates: ProgressQueue::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        let mut snapshot = state.snapshot.clone();
        if !snapshot.status.is_terminal() {
            snapshot.elapsed_ms = self.started.elapsed().as_millis() as u64;
        }
        snapshot
    }

    pub fn is_complete(&self) -> bool {
        self.lock().snapshot.status.is_terminal()
    }

    pub fn set_status(&self, stage: &str, message: &str) {
        self.mutate(|_, s| {
            s.status = OperationStatus::Running;
            s.stage = stage.to_string();
            s.message = message.to_string();
        });
    }

    pub fn set_file_progress(
        &self,
        current_file: &str,
        files_processed: u64,
        total_files: u64,
        current_size: u64,
        total_size: u64,
    ) {
        let elapsed = self.started.elapsed();
        self.mutate(|throughput, s| {
            s.status = OperationStatus::Running;
            s.current_file = Some(current_file.to_string());
            s.files_processed = files_processed;
            s.total_files = total_files;
            s.current_size = current_size;
            s.total_size = total_size;
            s.progress = percent(files_processed, total_files);
            s.eta_ms = estimate_remaining(elapsed, files_processed, total_files)
                .map(|eta| eta.as_millis() as u64);
            let (files_per_s, mb_per_s) = throughput.tick(files_processed, current_size);
            s.files_per_s = files_per_s.or(s.files_per_s);
            s.mb_per_s = mb_per_s.or(s.mb_per_s);
        });
    }

    pub fn set_backup_progress(&self, progress: f32, message: &str) {
        self.mutate(|_, s| {
            s.backup_progress = progress;
            s.message = message.to_string();
        });
    }

    pub fn set_deletion_progress(&self, progress: f32, message: &str) {
        self.mutate(|_, s| {
            s.deletion_progress = progress;
            s.message = message.to_string();
        });
    }

    pub fn complete(&self, message: &str) {
        self.finish(OperationStatus::Completed, message, None);
    }

    pub fn fail(&self, message: &str) {
        self.finish(OperationStatus::Failed, message, Some(message.to_string()));
    }

    pub fn mark_cancelled(&self, message: &str) {
        self.finish(OperationStatus::Cancelled, message, None);
    }

    fn finish(&self, status: OperationStatus, message: &str, error: Option<String>) {
        let elapsed = self.started.elapsed();
        self.mutate(|_, s| {
            s.status = status;
            s.stage = match status {
                OperationStatus::Completed => "completed",
                OperationStatus::Cancelled => "cancelled",
                _ => "failed",
            }
            .to_string();
            s.message = message.to_string();
            s.error = error;
            s.eta_ms = None;
            s.elapsed_ms = elapsed.as_millis() as u64;
            if status == OperationStatus::Completed {
                s.progress = 100.0;
            }
        });
        self.lock().finished = Some(Instant::now());
    }

    fn finished_before(&self, cutoff: Instant) -> bool {
        let state = self.lock();
        state.snapshot.status.is_terminal() && state.finished.map_or(false, |at| at <= cutoff)
    }

    fn mutate(&self, f: impl FnOnce(&mut ThroughputTracker, &mut ProgressSnapshot)) {
        let copy = {
            let mut state = self.lock();
            let TrackerState {
                snapshot,
                throughput,
                ..
            } = &mut *state;
            f(throughput, snapshot);
            if !snapshot.status.is_terminal() {
                snapshot.elapsed_ms = self.started.elapsed().as_millis() as u64;
            }
            snapshot.updated_at = Utc::now();
            snapshot.clone()
        };
        self.updates.publish(copy);
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressStats {
    pub total_trackers: usize,
    pub active_trackers: usize,
    pub completed_trackers: usize,
    pub failed_trackers: usize,
    pub cancelled_trackers: usize,
}

/// Registry of trackers for background operations, keyed by operation id.
/// Finished trackers stay queryable until `cleanup_completed` sweeps them.
#[derive(Clone, Default)]
pub struct ProgressManager {
    inner: Arc<DashMap<OperationId, Arc<ProgressTracker>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: OperationKind) -> Arc<ProgressTracker> {
        let tracker = Arc::new(ProgressTracker::detached(kind));
        self.inner.insert(tracker.id.clone(), Arc::clone(&tracker));
        tracker
    }

    pub fn tracker(&self, id: &str) -> CleanerResult<Arc<ProgressTracker>> {
        self.inner
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CleanerError::not_found("progress tracker", id))
    }

    pub fn get_progress(&self, id: &str) -> CleanerResult<ProgressSnapshot> {
        self.tracker(id).map(|tracker| tracker.snapshot())
    }

    pub fn cancel(&self, id: &str) -> bool {
        if let Some(entry) = self.inner.get(id) {
            entry.value().request_cancel();
            true
        } else {
            false
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.inner.iter() {
            if !entry.value().is_complete() {
                entry.value().request_cancel();
            }
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Drops finished trackers that completed at least `older_than` ago.
    pub fn cleanup_completed(&self, older_than: Duration) -> usize {
        let cutoff = Instant::now().checked_sub(older_than).unwrap_or_else(Instant::now);
        let before = self.inner.len();
        self.inner.retain(|_, tracker| !tracker.finished_before(cutoff));
        before - self.inner.len()
    }

    pub fn stats(&self) -> ProgressStats {
        let mut stats = ProgressStats {
            total_trackers: self.inner.len(),
            ..ProgressStats::default()
        };
        for entry in self.inner.iter() {
            match entry.value().snapshot().status {
                OperationStatus::Completed => stats.completed_trackers += 1,
                OperationStatus::Failed => stats.failed_trackers += 1,
                OperationStatus::Cancelled => stats.cancelled_trackers += 1,
                OperationStatus::Pending | OperationStatus::Running => stats.active_trackers += 1,
            }
        }
        stats
    }
}

/// A background operation the caller can poll, cancel, or await.
pub struct OperationHandle<T> {
    tracker: Arc<ProgressTracker>,
    join: JoinHandle<CleanerResult<T>>,
}

impl<T: Send + 'static> OperationHandle<T> {
    pub fn spawn<F>(tracker: Arc<ProgressTracker>, work: F) -> Self
    where
        F: Future<Output = CleanerResult<T>> + Send + 'static,
    {
        OperationHandle {
            tracker,
            join: tokio::spawn(work),
        }
    }

    pub fn id(&self) -> &str {
        self.tracker.id()
    }

    pub fn poll(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn cancel(&self) {
        self.tracker.request_cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    pub async fn wait(self) -> CleanerResult<T> {
        self.join.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_rejects_second_holder_until_released() {
        let flight = InFlight::new("scan");
        let guard = flight.try_begin().unwrap();
        let err = flight.try_begin().unwrap_err();
        assert!(err.is_already_in_progress());
        drop(guard);
        assert!(flight.try_begin().is_ok());
    }

    #[test]
    fn cancel_slot_signals_armed_token_only() {
        let slot = CancelSlot::default();
        assert!(!slot.cancel());
        let parent = CancellationToken::new();
        let token = slot.arm(Some(&parent));
        assert!(slot.cancel());
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn eta_scales_with_remaining_items() {
        let eta = estimate_remaining(Duration::from_secs(10), 5, 10).unwrap();
        assert_eq!(eta.as_secs(), 10);
        assert!(estimate_remaining(Duration::from_secs(1), 0, 10).is_none());
    }

    #[tokio::test]
    async fn queue_never_blocks_and_lagging_receiver_skips() {
        let queue: ProgressQueue<u32> = ProgressQueue::new(2);
        queue.publish(0);
        let mut rx = queue.subscribe();
        for value in 1..=5 {
            queue.publish(value);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap(), 4);
    }

    #[test]
    fn manager_tracks_lifecycle() {
        let manager = ProgressManager::new();
        let tracker = manager.register(OperationKind::Deletion);
        tracker.set_file_progress("a", 1, 4, 10, 40);

        let snapshot = manager.get_progress(tracker.id()).unwrap();
        assert_eq!(snapshot.status, OperationStatus::Running);
        assert_eq!(snapshot.progress, 25.0);
        assert_eq!(manager.stats().active_trackers, 1);

        tracker.complete("done");
        assert!(tracker.is_complete());
        assert_eq!(manager.stats().completed_trackers, 1);
        assert_eq!(manager.cleanup_completed(Duration::ZERO), 1);

        let err = manager.get_progress(tracker.id()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn handle_exposes_poll_cancel_wait() {
        let manager = ProgressManager::new();
        let tracker = manager.register(OperationKind::Restore);
        let worker = Arc::clone(&tracker);
        let handle = OperationHandle::spawn(Arc::clone(&tracker), async move {
            worker.token().cancelled().await;
            worker.mark_cancelled("stopped");
            Ok(7u32)
        });
        assert_eq!(handle.poll().status, OperationStatus::Pending);
        handle.cancel();
        assert_eq!(handle.wait().await.unwrap(), 7);
        assert_eq!(tracker.snapshot().status, OperationStatus::Cancelled);
    }
}
