//! Snapshot cache with resolution-aware lookups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use quickstep_core::id::TaskId;
use quickstep_core::platform::ThumbnailSource;
use quickstep_core::{Task, TaskKey, ThumbnailData};
use tracing::{trace, warn};

use crate::cancellable::CancellableTask;
use crate::high_res::{HighResCallback, HighResCallbackId, HighResLoadingState, HighResLoadingStateNotifier};
use crate::lru_cache::{CacheStats, TaskKeyLruCache};
use crate::visuals::TaskVisualsChangeListener;

type SharedListener = Arc<RwLock<Option<Arc<dyn TaskVisualsChangeListener>>>>;

/// Caches [`ThumbnailData`] per task and owns the [`HighResLoadingState`]
/// that decides which resolution is requested.
///
/// A cached full-resolution entry is never replaced by a reduced one coming
/// back from a slower fetch.
#[derive(Clone)]
pub struct TaskThumbnailCache {
    source: Arc<dyn ThumbnailSource>,
    cache: Arc<TaskKeyLruCache<ThumbnailData>>,
    high_res: Arc<Mutex<HighResLoadingState>>,
    desired_capacity: Arc<AtomicUsize>,
    listener: SharedListener,
}

impl TaskThumbnailCache {
    /// Create a cache backed by `source`.
    pub fn new(source: Arc<dyn ThumbnailSource>, capacity: usize, force_high_res: bool) -> Self {
        Self {
            source,
            cache: Arc::new(TaskKeyLruCache::new(capacity)),
            high_res: Arc::new(Mutex::new(HighResLoadingState::new(force_high_res))),
            desired_capacity: Arc::new(AtomicUsize::new(capacity)),
            listener: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the listener notified on explicit snapshot updates.
    pub fn set_visuals_listener(&self, listener: Arc<dyn TaskVisualsChangeListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn high_res(&self) -> MutexGuard<'_, HighResLoadingState> {
        self.high_res.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether full-resolution thumbnails are currently requested.
    pub fn is_high_res_enabled(&self) -> bool {
        self.high_res().is_enabled()
    }

    /// Forward recents visibility to the high-res state.
    ///
    /// Transition callbacks run on this call, after the state lock is released.
    pub fn set_visible(&self, visible: bool) {
        let transition = self.high_res().update_visible(visible);
        if let Some(transition) = transition {
            trace!(enabled = transition.enabled(), "High-res loading state changed");
            transition.notify();
        }
    }

    /// Forward the fast-fling signal to the high-res state.
    pub fn set_flinging_fast(&self, flinging_fast: bool) {
        let transition = self.high_res().update_flinging_fast(flinging_fast);
        if let Some(transition) = transition {
            trace!(enabled = transition.enabled(), "High-res loading state changed");
            transition.notify();
        }
    }

    /// Run `f` against the high-res state.
    pub fn with_high_res_state<R>(&self, f: impl FnOnce(&HighResLoadingState) -> R) -> R {
        f(&self.high_res())
    }

    /// Resolve the thumbnail of `task` at the currently requested resolution.
    ///
    /// Returns `None` when the platform has no snapshot and none can be taken.
    pub async fn get_thumbnail(&self, task: &Task) -> Option<ThumbnailData> {
        let low_resolution = !self.is_high_res_enabled();
        if let Some(thumbnail) = &task.thumbnail
            && thumbnail.satisfies(low_resolution)
        {
            return Some(thumbnail.clone());
        }
        if let Some(cached) = self.cache.get(&task.key)
            && cached.satisfies(low_resolution)
        {
            return Some(cached);
        }

        let source = Arc::clone(&self.source);
        let task_id = task.id();
        let fetched = tokio::task::spawn_blocking(move || {
            fetch_thumbnail(source.as_ref(), task_id, low_resolution)
        })
        .await;
        let data = match fetched {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Thumbnail fetch did not complete");
                return None;
            }
        };

        let incoming_reduced = data.reduced_resolution;
        let retained = self.cache.put_unless(task.key.clone(), data, |existing, incoming| {
            incoming.reduced_resolution && !existing.reduced_resolution && existing.has_bitmap()
        });
        if incoming_reduced && !retained.reduced_resolution {
            trace!(task_id = %task_id, "Kept cached full-resolution thumbnail over reduced fetch");
        }
        Some(retained)
    }

    /// Resolve the thumbnail of `task` and hand it to `callback`.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn get_thumbnail_in_background<F>(&self, task: Task, callback: F) -> CancellableTask
    where
        F: FnOnce(Option<ThumbnailData>) + Send + 'static,
    {
        let cache = self.clone();
        CancellableTask::spawn(async move {
            let thumbnail = cache.get_thumbnail(&task).await;
            callback(thumbnail);
        })
    }

    /// Record a snapshot pushed by the platform and announce it.
    ///
    /// Explicit updates always replace the cached entry.
    pub fn on_task_snapshot_changed(&self, key: TaskKey, data: ThumbnailData) {
        let task_id = key.id;
        self.cache.put(key, data.clone());
        let listener = self.listener.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(listener) = listener {
            listener.on_task_thumbnail_changed(task_id, &data);
        }
    }

    /// Cached entry for `key`, without promoting it.
    pub fn cached(&self, key: &TaskKey) -> Option<ThumbnailData> {
        self.cache.peek(key)
    }

    /// Drop the entry of one task.
    pub fn remove(&self, key: &TaskKey) {
        self.cache.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Record the capacity to apply on the next
    /// [`update_cache_size_and_remove_excess`](Self::update_cache_size_and_remove_excess).
    pub fn set_desired_cache_size(&self, capacity: usize) {
        self.desired_capacity.store(capacity, Ordering::Relaxed);
    }

    /// Apply the desired capacity, evicting excess entries.
    ///
    /// Returns `true` when the capacity grew.
    pub fn update_cache_size_and_remove_excess(&self) -> bool {
        let desired = self.desired_capacity.load(Ordering::Relaxed).max(1);
        let previous = self.cache.resize(desired);
        desired > previous
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Lookup counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl HighResLoadingStateNotifier for TaskThumbnailCache {
    fn add_high_res_callback(&self, callback: HighResCallback) -> HighResCallbackId {
        self.high_res().add_callback(callback)
    }

    fn remove_high_res_callback(&self, id: HighResCallbackId) {
        self.high_res().remove_callback(id);
    }
}

fn fetch_thumbnail(
    source: &dyn ThumbnailSource,
    task_id: TaskId,
    low_resolution: bool,
) -> Option<ThumbnailData> {
    let stored = source
        .task_thumbnail(task_id, low_resolution)
        .unwrap_or_else(|err| {
            warn!(task_id = %task_id, error = %err, "Snapshot read failed");
            None
        });
    if let Some(data) = stored.filter(ThumbnailData::has_bitmap) {
        return Some(data);
    }
    source.take_task_snapshot(task_id).unwrap_or_else(|err| {
        warn!(task_id = %task_id, error = %err, "Snapshot capture failed");
        None
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use quickstep_core::id::{SnapshotId, UserId};
    use quickstep_core::{Bitmap, ComponentName};
    use quickstep_platform::InMemoryPlatform;
    use std::sync::atomic::AtomicBool;

    fn task(id: i32) -> Task {
        Task::new(TaskKey::new(
            TaskId(id),
            ComponentName::new(format!("com.example.app{id}"), "MainActivity"),
            UserId::SYSTEM,
        ))
    }

    fn high_res_data(snapshot: u64) -> ThumbnailData {
        ThumbnailData::new(Bitmap::solid(8, 8, [1; 4]), false, SnapshotId(snapshot))
    }

    #[tokio::test]
    async fn resolution_follows_high_res_state() {
        let platform = Arc::new(InMemoryPlatform::synthetic(2));
        let cache = TaskThumbnailCache::new(platform, 4, false);

        let low = cache.get_thumbnail(&task(1)).await.unwrap();
        assert!(low.reduced_resolution);

        cache.set_visible(true);
        let high = cache.get_thumbnail(&task(1)).await.unwrap();
        assert!(!high.reduced_resolution);
        assert!(!cache.cached(&task(1).key).unwrap().reduced_resolution);
    }

    #[tokio::test]
    async fn carried_thumbnail_is_reused_when_sufficient() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        let cache = TaskThumbnailCache::new(platform.clone(), 4, true);
        let mut task = task(1);
        task.thumbnail = Some(high_res_data(99));

        let data = cache.get_thumbnail(&task).await.unwrap();

        assert_eq!(data.snapshot_id, SnapshotId(99));
        assert_eq!(platform.call_counts().thumbnail_reads, 0);
    }

    #[tokio::test]
    async fn cached_reduced_entry_is_refetched_for_high_res() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        let cache = TaskThumbnailCache::new(platform.clone(), 4, false);
        cache.get_thumbnail(&task(1)).await.unwrap();
        cache.get_thumbnail(&task(1)).await.unwrap();
        assert_eq!(platform.call_counts().thumbnail_reads, 1);

        cache.set_visible(true);
        cache.get_thumbnail(&task(1)).await.unwrap();
        assert_eq!(platform.call_counts().thumbnail_reads, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_reduced_fetch_never_replaces_full_resolution() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        let cache = TaskThumbnailCache::new(platform.clone(), 4, false);
        platform.block_thumbnails(TaskId(1));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_thumbnail(&task(1)).await })
        };
        tokio::task::yield_now().await;
        cache.on_task_snapshot_changed(task(1).key, high_res_data(42));
        platform.release_thumbnails(TaskId(1));

        let returned = pending.await.unwrap().unwrap();
        assert!(!returned.reduced_resolution);
        assert_eq!(returned.snapshot_id, SnapshotId(42));
        assert_eq!(cache.cached(&task(1).key).unwrap().snapshot_id, SnapshotId(42));
    }

    #[tokio::test]
    async fn missing_snapshot_falls_back_to_capture() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.mark_live(TaskId(5));
        let cache = TaskThumbnailCache::new(platform.clone(), 4, false);

        let data = cache.get_thumbnail(&task(5)).await.unwrap();

        assert!(data.has_bitmap());
        assert_eq!(platform.call_counts().snapshot_captures, 1);
    }

    #[tokio::test]
    async fn unknown_task_yields_nothing() {
        let platform = Arc::new(InMemoryPlatform::new());
        let cache = TaskThumbnailCache::new(platform, 4, false);
        assert!(cache.get_thumbnail(&task(3)).await.is_none());
        assert!(cache.cached(&task(3).key).is_none());
    }

    #[test]
    fn desired_capacity_applies_on_update() {
        let platform = Arc::new(InMemoryPlatform::new());
        let cache = TaskThumbnailCache::new(platform, 2, false);
        cache.on_task_snapshot_changed(task(1).key, high_res_data(1));
        cache.on_task_snapshot_changed(task(2).key, high_res_data(2));

        cache.set_desired_cache_size(1);
        assert!(!cache.update_cache_size_and_remove_excess());
        assert!(cache.cached(&task(1).key).is_none());
        assert!(cache.cached(&task(2).key).is_some());

        cache.set_desired_cache_size(5);
        assert!(cache.update_cache_size_and_remove_excess());
        assert_eq!(cache.capacity(), 5);
    }

    #[test]
    fn high_res_notifier_reports_transitions() {
        let platform = Arc::new(InMemoryPlatform::new());
        let cache = TaskThumbnailCache::new(platform, 2, false);
        let fired = Arc::new(AtomicBool::new(false));
        let id = {
            let fired = Arc::clone(&fired);
            cache.add_high_res_callback(Arc::new(move |enabled| fired.store(enabled, Ordering::SeqCst)))
        };

        cache.set_visible(true);
        assert!(fired.load(Ordering::SeqCst));

        cache.remove_high_res_callback(id);
        cache.set_flinging_fast(true);
        assert!(fired.load(Ordering::SeqCst));
        assert!(!cache.is_high_res_enabled());
    }

    #[test]
    fn transition_callback_can_read_the_new_tier() {
        let platform = Arc::new(InMemoryPlatform::new());
        let cache = TaskThumbnailCache::new(platform, 2, false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let reader = cache.clone();
            let seen = Arc::clone(&seen);
            cache.add_high_res_callback(Arc::new(move |enabled| {
                seen.lock().unwrap().push((enabled, reader.is_high_res_enabled()));
            }));
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let driver = cache.clone();
        std::thread::spawn(move || {
            driver.set_visible(true);
            driver.set_flinging_fast(true);
            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("transitions delivered without holding the state lock");
        assert_eq!(*seen.lock().unwrap(), vec![(true, true), (false, false)]);
    }
}
