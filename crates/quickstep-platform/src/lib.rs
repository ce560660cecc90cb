//! In-memory platform backend for quickstep.
//!
//! Implements every platform contract from [`quickstep_core::platform`] over
//! plain collections. Fetch gates and call counters make it usable as a
//! controllable fake in tests; artificial latency makes it usable as a
//! simulator backend.

use quickstep_core::id::{SnapshotId, TaskId, UserId};
use quickstep_core::platform::{
    ActivityInfo, ActivityInfoSource, PlatformError, RecentTasksSource, ThumbnailSource,
};
use quickstep_core::{
    Bitmap, ComponentName, Task, TaskGroup, TaskKey, ThumbnailData,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

const DEFAULT_ICON_SIZE: u32 = 4;
const HIGH_RES_SIZE: u32 = 8;
const LOW_RES_SIZE: u32 = 4;

#[derive(Default)]
struct StoredSnapshot {
    high: Option<Bitmap>,
    low: Option<Bitmap>,
    snapshot_id: SnapshotId,
}

#[derive(Default)]
struct PlatformState {
    groups: Vec<TaskGroup>,
    activities: HashMap<ComponentName, ActivityInfo>,
    snapshots: HashMap<TaskId, StoredSnapshot>,
    live_tasks: HashSet<TaskId>,
    unavailable: bool,
}

/// Number of calls served per platform contract.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    /// `get_tasks` calls.
    pub task_list_fetches: usize,
    /// `activity_info` calls.
    pub activity_lookups: usize,
    /// `task_thumbnail` calls.
    pub thumbnail_reads: usize,
    /// `take_task_snapshot` calls.
    pub snapshot_captures: usize,
}

#[derive(Default)]
struct Counters {
    task_list_fetches: AtomicUsize,
    activity_lookups: AtomicUsize,
    thumbnail_reads: AtomicUsize,
    snapshot_captures: AtomicUsize,
}

/// Platform backend holding tasks, activities and snapshots in memory.
pub struct InMemoryPlatform {
    state: Mutex<PlatformState>,
    blocked: Mutex<HashSet<TaskId>>,
    unblocked: Condvar,
    latency: Duration,
    counters: Counters,
    next_snapshot: AtomicU64,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    /// Empty platform answering instantly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            blocked: Mutex::new(HashSet::new()),
            unblocked: Condvar::new(),
            latency: Duration::ZERO,
            counters: Counters::default(),
            next_snapshot: AtomicU64::new(1),
        }
    }

    /// Delay every icon and thumbnail call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Platform populated with `count` single tasks, each with an activity,
    /// both snapshot tiers and a live surface. Task ids start at 1.
    #[must_use]
    pub fn synthetic(count: usize) -> Self {
        let platform = Self::new();
        let mut groups = Vec::with_capacity(count);
        for n in 1..=count {
            let id = TaskId(i32::try_from(n).unwrap_or(i32::MAX));
            let component = ComponentName::new(format!("com.example.app{n}"), "MainActivity");
            let user = if n % 4 == 0 { UserId(10) } else { UserId::SYSTEM };
            let key = TaskKey::new(id, component.clone(), user);
            let shade = u8::try_from(n % 256).unwrap_or(u8::MAX);
            platform.add_activity(
                component,
                ActivityInfo {
                    label: format!("App {n}"),
                    icon: Some(Bitmap::solid(DEFAULT_ICON_SIZE, DEFAULT_ICON_SIZE, [shade, 0, 0, 255])),
                },
            );
            platform.store_thumbnail(
                id,
                Some(Bitmap::solid(HIGH_RES_SIZE, HIGH_RES_SIZE, [0, shade, 0, 255])),
                Some(Bitmap::solid(LOW_RES_SIZE, LOW_RES_SIZE, [0, shade, 0, 255])),
            );
            platform.mark_live(id);
            groups.push(TaskGroup::Single(Task::new(key)));
        }
        platform.set_tasks(groups);
        platform
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the recent task list.
    pub fn set_tasks(&self, groups: Vec<TaskGroup>) {
        self.state().groups = groups;
    }

    /// Register activity metadata for a component.
    pub fn add_activity(&self, component: ComponentName, info: ActivityInfo) {
        self.state().activities.insert(component, info);
    }

    /// Store snapshot tiers for a task and return the new snapshot id.
    pub fn store_thumbnail(&self, task_id: TaskId, high: Option<Bitmap>, low: Option<Bitmap>) -> SnapshotId {
        let snapshot_id = SnapshotId(self.next_snapshot.fetch_add(1, Ordering::Relaxed));
        self.state().snapshots.insert(
            task_id,
            StoredSnapshot {
                high,
                low,
                snapshot_id,
            },
        );
        snapshot_id
    }

    /// Mark a task as live so snapshot capture succeeds.
    pub fn mark_live(&self, task_id: TaskId) {
        self.state().live_tasks.insert(task_id);
    }

    /// Make every call fail with [`PlatformError::ServiceUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Hold thumbnail calls for `task_id` until released.
    pub fn block_thumbnails(&self, task_id: TaskId) {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id);
    }

    /// Release held thumbnail calls for `task_id`.
    pub fn release_thumbnails(&self, task_id: TaskId) {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
        self.unblocked.notify_all();
    }

    /// Snapshot of the call counters.
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            task_list_fetches: self.counters.task_list_fetches.load(Ordering::SeqCst),
            activity_lookups: self.counters.activity_lookups.load(Ordering::SeqCst),
            thumbnail_reads: self.counters.thumbnail_reads.load(Ordering::SeqCst),
            snapshot_captures: self.counters.snapshot_captures.load(Ordering::SeqCst),
        }
    }

    fn wait_until_released(&self, task_id: TaskId) {
        let mut blocked = self.blocked.lock().unwrap_or_else(PoisonError::into_inner);
        while blocked.contains(&task_id) {
            trace!(%task_id, "Thumbnail fetch held");
            blocked = self
                .unblocked
                .wait(blocked)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }

    fn ensure_available(&self, service: &str) -> Result<(), PlatformError> {
        if self.state().unavailable {
            debug!(service, "Platform service unavailable");
            return Err(PlatformError::ServiceUnavailable(service.to_owned()));
        }
        Ok(())
    }
}

impl RecentTasksSource for InMemoryPlatform {
    fn get_tasks(&self) -> Result<Vec<TaskGroup>, PlatformError> {
        self.counters.task_list_fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_available("activity_task_manager")?;
        Ok(self.state().groups.clone())
    }
}

impl ActivityInfoSource for InMemoryPlatform {
    fn activity_info(&self, key: &TaskKey) -> Result<Option<ActivityInfo>, PlatformError> {
        self.counters.activity_lookups.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency();
        self.ensure_available("package_manager")?;
        Ok(self.state().activities.get(&key.component).cloned())
    }

    fn default_icon(&self, _user: UserId) -> Bitmap {
        Bitmap::solid(DEFAULT_ICON_SIZE, DEFAULT_ICON_SIZE, [128, 128, 128, 255])
    }
}

impl ThumbnailSource for InMemoryPlatform {
    fn task_thumbnail(
        &self,
        task_id: TaskId,
        reduced_resolution: bool,
    ) -> Result<Option<ThumbnailData>, PlatformError> {
        self.counters.thumbnail_reads.fetch_add(1, Ordering::SeqCst);
        self.wait_until_released(task_id);
        self.simulate_latency();
        self.ensure_available("task_snapshot")?;
        let state = self.state();
        let Some(stored) = state.snapshots.get(&task_id) else {
            return Ok(None);
        };
        // A missing low-res tier is served from the high-res capture.
        let (bitmap, reduced) = if reduced_resolution {
            stored
                .low
                .clone()
                .map_or_else(|| (stored.high.clone(), false), |low| (Some(low), true))
        } else {
            (stored.high.clone(), false)
        };
        Ok(bitmap.map(|bitmap| ThumbnailData::new(bitmap, reduced, stored.snapshot_id)))
    }

    fn take_task_snapshot(&self, task_id: TaskId) -> Result<Option<ThumbnailData>, PlatformError> {
        self.counters.snapshot_captures.fetch_add(1, Ordering::SeqCst);
        self.wait_until_released(task_id);
        self.ensure_available("task_snapshot")?;
        if !self.state().live_tasks.contains(&task_id) {
            return Ok(None);
        }
        let bitmap = Bitmap::solid(HIGH_RES_SIZE, HIGH_RES_SIZE, [255, 255, 255, 255]);
        let snapshot_id = self.store_thumbnail(task_id, Some(bitmap.clone()), None);
        Ok(Some(ThumbnailData::new(bitmap, false, snapshot_id)))
    }
}
