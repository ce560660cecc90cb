//! Reactive store of recent tasks with demand-driven visual loading.
//!
//! The task list lives in a `tokio::sync::watch` channel holding an
//! `Arc<TaskListState>`; every change publishes a new value, so observers
//! never see a half-applied update. Icons and thumbnails are only fetched for
//! tasks marked visible through [`TasksRepository::set_visible_tasks`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use quickstep_core::id::TaskId;
use quickstep_core::platform::{PlatformError, RecentTasksSource};
use quickstep_core::{Task, TaskCacheEntry, TaskGroup, TaskKey, ThumbnailData};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::icon_cache::TaskIconCache;
use crate::thumbnail_cache::TaskThumbnailCache;
use crate::visuals::{TaskIconChangedCallback, TaskThumbnailChangedCallback, TaskVisualsChangedDelegate};

/// Ordered task list with an id index.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskListState {
    tasks: Vec<Task>,
    task_index: HashMap<TaskId, usize>,
}

impl TaskListState {
    /// Build the state from an ordered task list. Later duplicates of an id
    /// are dropped.
    #[must_use]
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut state = Self {
            tasks: Vec::with_capacity(tasks.len()),
            task_index: HashMap::with_capacity(tasks.len()),
        };
        for task in tasks {
            if state.task_index.contains_key(&task.id()) {
                continue;
            }
            state.task_index.insert(task.id(), state.tasks.len());
            state.tasks.push(task);
        }
        state
    }

    /// Tasks in platform order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Look up a task by id.
    #[must_use]
    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.task_index
            .get(&task_id)
            .and_then(|&idx| self.tasks.get(idx))
    }

    /// Whether `task_id` is known.
    #[must_use]
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.task_index.contains_key(&task_id)
    }

    /// Task ids in platform order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().map(Task::id)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Apply `update` to the task stored under `key.id` when its key still
/// matches. Copies the state only if the task actually changes.
fn update_task_in(
    state: &mut Arc<TaskListState>,
    key: &TaskKey,
    update: impl FnOnce(&mut Task),
) -> bool {
    let Some(&idx) = state.task_index.get(&key.id) else {
        return false;
    };
    let Some(current) = state.tasks.get(idx) else {
        return false;
    };
    if current.key != *key {
        return false;
    }
    let mut updated = current.clone();
    update(&mut updated);
    if updated == *current {
        return false;
    }
    if let Some(slot) = Arc::make_mut(state).tasks.get_mut(idx) {
        *slot = updated;
    }
    true
}

#[derive(Debug, Default)]
struct TaskRequest {
    registered: Option<TaskKey>,
    job: Option<JoinHandle<()>>,
    refreshes: Vec<AbortHandle>,
}

impl TaskRequest {
    fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
        for refresh in self.refreshes.drain(..) {
            refresh.abort();
        }
    }
}

struct RepositoryInner {
    source: Arc<dyn RecentTasksSource>,
    icon_cache: TaskIconCache,
    thumbnail_cache: TaskThumbnailCache,
    visuals: Arc<TaskVisualsChangedDelegate>,
    runtime: Handle,
    tasks: watch::Sender<Arc<TaskListState>>,
    requests: Mutex<HashMap<TaskId, TaskRequest>>,
}

/// Source of truth for the recent task list.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct TasksRepository {
    inner: Arc<RepositoryInner>,
}

impl TasksRepository {
    /// Create an empty repository. Background work is spawned on `runtime`.
    pub fn new(
        source: Arc<dyn RecentTasksSource>,
        icon_cache: TaskIconCache,
        thumbnail_cache: TaskThumbnailCache,
        visuals: Arc<TaskVisualsChangedDelegate>,
        runtime: Handle,
    ) -> Self {
        let (tasks, _) = watch::channel(Arc::new(TaskListState::default()));
        Self {
            inner: Arc::new(RepositoryInner {
                source,
                icon_cache,
                thumbnail_cache,
                visuals,
                runtime,
                tasks,
                requests: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Observe the task list. With `force_refresh`, a fetch of the
    /// authoritative list is started in the background.
    pub fn get_all_task_data(&self, force_refresh: bool) -> TaskListObserver {
        let observer = TaskListObserver {
            receiver: self.inner.tasks.subscribe(),
        };
        if force_refresh {
            let repository = self.clone();
            self.inner.runtime.spawn(async move {
                if let Err(err) = repository.refresh().await {
                    warn!(error = %err, "Recent task refresh failed");
                }
            });
        }
        observer
    }

    /// Fetch the authoritative task list and install it.
    ///
    /// Requests for ids missing from the new list are dropped in the same
    /// critical section that publishes the list, then torn down; requests for
    /// the remaining ids are relaunched.
    ///
    /// # Errors
    /// Returns the platform error when the task list cannot be fetched; the
    /// previous list stays in place.
    pub async fn refresh(&self) -> Result<(), PlatformError> {
        let source = Arc::clone(&self.inner.source);
        let groups = tokio::task::spawn_blocking(move || source.get_tasks())
            .await
            .map_err(|err| PlatformError::Other(err.to_string()))??;
        let group_count = groups.len();
        let state = TaskListState::from_tasks(groups.into_iter().flat_map(TaskGroup::into_tasks).collect());

        let task_count = state.len();
        let removed: Vec<(TaskId, TaskRequest)> = {
            let mut requests = self.inner.requests();
            let doomed: Vec<TaskId> = requests
                .keys()
                .copied()
                .filter(|id| !state.contains(*id))
                .collect();
            let removed = doomed
                .into_iter()
                .filter_map(|id| requests.remove(&id).map(|request| (id, request)))
                .collect();
            // A concurrent launch sees either the old requests with the old
            // list or the new requests with the new list.
            self.inner.tasks.send_replace(Arc::new(state));
            removed
        };
        for (task_id, request) in removed {
            self.inner.release_request(task_id, request);
        }

        let pending: Vec<TaskId> = self.inner.requests().keys().copied().collect();
        for task_id in &pending {
            self.inner.launch_request(*task_id);
        }
        info!(groups = group_count, tasks = task_count, pending = pending.len(), "Recent tasks refreshed");
        Ok(())
    }

    /// Observe one task. Emits only when the task value changes.
    pub fn get_task_data_by_id(&self, task_id: TaskId) -> TaskObserver {
        TaskFieldObserver::new(self.inner.tasks.subscribe(), task_id, project_task, |a, b| a == b)
    }

    /// Observe one task's thumbnail. Emits only when the snapshot id or
    /// resolution changes.
    pub fn get_thumbnail_by_id(&self, task_id: TaskId) -> ThumbnailObserver {
        TaskFieldObserver::new(
            self.inner.tasks.subscribe(),
            task_id,
            project_thumbnail,
            same_thumbnail,
        )
    }

    /// Current thumbnail of a task without subscribing.
    pub fn get_current_thumbnail_by_id(&self, task_id: TaskId) -> Option<ThumbnailData> {
        self.inner
            .tasks
            .borrow()
            .get(task_id)
            .and_then(|task| task.thumbnail.clone())
    }

    /// Current task list snapshot.
    pub fn current_tasks(&self) -> Arc<TaskListState> {
        Arc::clone(&*self.inner.tasks.borrow())
    }

    /// Replace the visible set.
    ///
    /// Newly visible tasks get one fetch job each; tasks that are no longer
    /// visible have their job cancelled, callbacks removed and visuals
    /// cleared. Ids that stay visible are left alone.
    ///
    /// # Panics
    /// Panics if the runtime handle passed at construction has shut down.
    pub fn set_visible_tasks(&self, visible: impl IntoIterator<Item = TaskId>) {
        let visible: HashSet<TaskId> = visible.into_iter().collect();
        let (removed, added) = {
            let mut requests = self.inner.requests();
            let hidden: Vec<TaskId> = requests
                .keys()
                .copied()
                .filter(|id| !visible.contains(id))
                .collect();
            let removed: Vec<(TaskId, TaskRequest)> = hidden
                .into_iter()
                .filter_map(|id| requests.remove(&id).map(|request| (id, request)))
                .collect();
            let added: Vec<TaskId> = visible
                .iter()
                .copied()
                .filter(|id| !requests.contains_key(id))
                .collect();
            for task_id in &added {
                requests.insert(*task_id, TaskRequest::default());
            }
            (removed, added)
        };

        debug!(added = added.len(), removed = removed.len(), "Visible tasks changed");
        for (task_id, request) in removed {
            self.inner.release_request(task_id, request);
        }
        for task_id in added {
            self.inner.launch_request(task_id);
        }
    }

    /// Whether `task_id` is in the visible set.
    pub fn is_task_requested(&self, task_id: TaskId) -> bool {
        self.inner.requests().contains_key(&task_id)
    }

    /// Visible task ids, sorted.
    pub fn requested_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.requests().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl RepositoryInner {
    fn requests(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_task(&self, key: &TaskKey, update: impl FnOnce(&mut Task)) -> bool {
        self.tasks.send_if_modified(|state| update_task_in(state, key, update))
    }

    /// Publish a fetch result unless the task stopped being requested.
    /// The request map stays locked so a concurrent release cannot clear
    /// the task in between.
    fn apply_if_requested(&self, key: &TaskKey, update: impl FnOnce(&mut Task)) {
        let requests = self.requests();
        if requests.contains_key(&key.id) {
            self.update_task(key, update);
        }
    }

    fn apply_icon(&self, key: &TaskKey, entry: TaskCacheEntry) {
        self.apply_if_requested(key, |task| task.apply_icon_entry(entry));
    }

    fn apply_thumbnail(&self, key: &TaskKey, thumbnail: Option<ThumbnailData>) {
        self.apply_if_requested(key, |task| task.thumbnail = thumbnail);
    }

    fn release_request(&self, task_id: TaskId, mut request: TaskRequest) {
        request.cancel();
        if let Some(key) = request.registered.take() {
            self.visuals.unregister_task_icon_changed_callback(&key);
            self.visuals.unregister_task_thumbnail_changed_callback(&key);
        }
        let key = self.tasks.borrow().get(task_id).map(|task| task.key.clone());
        if let Some(key) = key {
            self.update_task(&key, Task::clear_visuals);
        }
    }

    fn launch_request(self: &Arc<Self>, task_id: TaskId) {
        // Unknown ids keep their placeholder until a refresh lists them.
        let Some(task) = self.tasks.borrow().get(task_id).cloned() else {
            self.reset_request(task_id);
            return;
        };
        let key = task.key.clone();
        let callback = Arc::new(TaskVisualsCallback {
            repository: Arc::downgrade(self),
            key: key.clone(),
        });
        self.visuals.register_task_icon_changed_callback(&key, callback.clone());
        self.visuals.register_task_thumbnail_changed_callback(&key, callback);

        let weak = Arc::downgrade(self);
        let icon_cache = self.icon_cache.clone();
        let thumbnail_cache = self.thumbnail_cache.clone();
        let job = self.runtime.spawn(async move {
            let icon = async {
                let entry = icon_cache.get_icon(&task).await;
                if let Some(inner) = weak.upgrade() {
                    inner.apply_icon(&task.key, entry);
                }
            };
            let thumbnail = async {
                let thumbnail = thumbnail_cache.get_thumbnail(&task).await;
                if let Some(inner) = weak.upgrade() {
                    inner.apply_thumbnail(&task.key, thumbnail);
                }
            };
            tokio::join!(icon, thumbnail);
        });

        let mut requests = self.requests();
        let listed = self.tasks.borrow().get(task_id).is_some_and(|current| current.key == key);
        match requests.get_mut(&task_id) {
            Some(request) if listed => {
                if let Some(previous) = request.job.replace(job) {
                    previous.abort();
                }
                request.registered = Some(key);
            }
            request => {
                if let Some(request) = request
                    && request.registered.as_ref() == Some(&key)
                {
                    request.registered = None;
                }
                drop(requests);
                job.abort();
                self.visuals.unregister_task_icon_changed_callback(&key);
                self.visuals.unregister_task_thumbnail_changed_callback(&key);
            }
        }
    }

    /// Cancel the work of a request whose task is not listed, keeping the
    /// request itself as a placeholder.
    fn reset_request(&self, task_id: TaskId) {
        let registered = {
            let mut requests = self.requests();
            let Some(request) = requests.get_mut(&task_id) else {
                return;
            };
            request.cancel();
            request.registered.take()
        };
        if let Some(key) = registered {
            debug!(task_id = %task_id, "Dropped visuals of an unlisted task");
            self.visuals.unregister_task_icon_changed_callback(&key);
            self.visuals.unregister_task_thumbnail_changed_callback(&key);
        }
    }

    /// Whether the stored thumbnail of `key` already has the resolution
    /// `low_resolution` asks for.
    fn has_thumbnail_for(&self, key: &TaskKey, low_resolution: bool) -> bool {
        self.tasks
            .borrow()
            .get(key.id)
            .filter(|task| task.key == *key)
            .and_then(|task| task.thumbnail.as_ref())
            .is_some_and(|thumbnail| thumbnail.satisfies(low_resolution))
    }

    fn spawn_refresh(self: &Arc<Self>, key: &TaskKey, kind: RefreshKind) {
        if !self.requests().contains_key(&key.id) {
            return;
        }
        let Some(mut task) = self.tasks.borrow().get(key.id).cloned() else {
            return;
        };
        if task.key != *key {
            return;
        }

        if matches!(kind, RefreshKind::Icon)
            && let Some(entry) = self.icon_cache.cached(key)
        {
            self.apply_icon(key, entry);
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = match kind {
            RefreshKind::Icon => {
                task.icon = None;
                let icon_cache = self.icon_cache.clone();
                self.runtime.spawn(async move {
                    let entry = icon_cache.get_icon(&task).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_icon(&task.key, entry);
                    }
                })
            }
            RefreshKind::Thumbnail => {
                let thumbnail_cache = self.thumbnail_cache.clone();
                self.runtime.spawn(async move {
                    let thumbnail = thumbnail_cache.get_thumbnail(&task).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_thumbnail(&task.key, thumbnail);
                    }
                })
            }
        };

        let mut requests = self.requests();
        match requests.get_mut(&key.id) {
            Some(request) => {
                request.refreshes.retain(|refresh| !refresh.is_finished());
                request.refreshes.push(handle.abort_handle());
            }
            None => handle.abort(),
        }
    }
}

impl Drop for RepositoryInner {
    fn drop(&mut self) {
        let requests = self.requests.get_mut().unwrap_or_else(PoisonError::into_inner);
        for request in requests.values_mut() {
            request.cancel();
        }
    }
}

#[derive(Clone, Copy)]
enum RefreshKind {
    Icon,
    Thumbnail,
}

struct TaskVisualsCallback {
    repository: Weak<RepositoryInner>,
    key: TaskKey,
}

impl TaskIconChangedCallback for TaskVisualsCallback {
    fn on_task_icon_changed(&self) {
        if let Some(inner) = self.repository.upgrade() {
            inner.spawn_refresh(&self.key, RefreshKind::Icon);
        }
    }
}

impl TaskThumbnailChangedCallback for TaskVisualsCallback {
    fn on_task_thumbnail_changed(&self, thumbnail: Option<ThumbnailData>) {
        if let Some(inner) = self.repository.upgrade() {
            inner.apply_thumbnail(&self.key, thumbnail);
        }
    }

    fn on_high_res_loading_state_changed(&self, enabled: bool) {
        if let Some(inner) = self.repository.upgrade()
            && !inner.has_thumbnail_for(&self.key, !enabled)
        {
            inner.spawn_refresh(&self.key, RefreshKind::Thumbnail);
        }
    }
}

/// Observer of the whole task list.
#[derive(Debug)]
pub struct TaskListObserver {
    receiver: watch::Receiver<Arc<TaskListState>>,
}

impl TaskListObserver {
    /// Latest published list.
    pub fn current(&self) -> Arc<TaskListState> {
        Arc::clone(&*self.receiver.borrow())
    }

    /// Wait for the next published list. `None` once the repository is gone.
    pub async fn changed(&mut self) -> Option<Arc<TaskListState>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&*self.receiver.borrow_and_update()))
    }

    /// Wait until the list satisfies `predicate`, checking the current value
    /// first. `None` once the repository is gone.
    pub async fn wait_until(
        &mut self,
        mut predicate: impl FnMut(&TaskListState) -> bool,
    ) -> Option<Arc<TaskListState>> {
        let state = self.receiver.wait_for(|state| predicate(state)).await.ok()?;
        Some(Arc::clone(&*state))
    }
}

type Projection<T> = fn(&TaskListState, TaskId) -> Option<T>;
type Equivalence<T> = fn(&Option<T>, &Option<T>) -> bool;

/// Deduplicating observer of one projection of one task.
pub struct TaskFieldObserver<T> {
    receiver: watch::Receiver<Arc<TaskListState>>,
    task_id: TaskId,
    project: Projection<T>,
    same: Equivalence<T>,
    last: Option<Option<T>>,
}

/// Observer of one task.
pub type TaskObserver = TaskFieldObserver<Task>;

/// Observer of one task's thumbnail.
pub type ThumbnailObserver = TaskFieldObserver<ThumbnailData>;

impl<T: Clone> TaskFieldObserver<T> {
    fn new(
        receiver: watch::Receiver<Arc<TaskListState>>,
        task_id: TaskId,
        project: Projection<T>,
        same: Equivalence<T>,
    ) -> Self {
        Self {
            receiver,
            task_id,
            project,
            same,
            last: None,
        }
    }

    /// Observed task id.
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Current projected value.
    pub fn current(&self) -> Option<T> {
        (self.project)(&self.receiver.borrow(), self.task_id)
    }

    /// Next distinct value. The first call yields the current value.
    /// `None` once the repository is gone.
    pub async fn next(&mut self) -> Option<Option<T>> {
        loop {
            let value = (self.project)(&self.receiver.borrow_and_update(), self.task_id);
            let is_new = self.last.as_ref().is_none_or(|last| !(self.same)(last, &value));
            if is_new {
                self.last = Some(value.clone());
                return Some(value);
            }
            self.receiver.changed().await.ok()?;
        }
    }
}

fn project_task(state: &TaskListState, task_id: TaskId) -> Option<Task> {
    state.get(task_id).cloned()
}

fn project_thumbnail(state: &TaskListState, task_id: TaskId) -> Option<ThumbnailData> {
    state.get(task_id).and_then(|task| task.thumbnail.clone())
}

fn same_thumbnail(a: &Option<ThumbnailData>, b: &Option<ThumbnailData>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.snapshot_id == b.snapshot_id
                && a.reduced_resolution == b.reduced_resolution
                && a.has_bitmap() == b.has_bitmap()
        }
        _ => false,
    }
}
