//! Icon, title and content description cache for recent tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use quickstep_core::id::UserId;
use quickstep_core::platform::{ActivityInfo, ActivityInfoSource};
use quickstep_core::{Icon, Task, TaskCacheEntry, TaskDescription, TaskKey};
use tracing::{trace, warn};

use crate::cancellable::CancellableTask;
use crate::lru_cache::{CacheStats, TaskKeyLruCache};
use crate::visuals::TaskVisualsChangeListener;

type SharedListener = Arc<RwLock<Option<Arc<dyn TaskVisualsChangeListener>>>>;

/// Loads and caches [`TaskCacheEntry`] values keyed by [`TaskKey`].
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct TaskIconCache {
    source: Arc<dyn ActivityInfoSource>,
    cache: Arc<TaskKeyLruCache<TaskCacheEntry>>,
    default_icons: Arc<Mutex<HashMap<UserId, Icon>>>,
    listener: SharedListener,
}

impl TaskIconCache {
    /// Create a cache backed by `source` holding at most `capacity` entries.
    pub fn new(source: Arc<dyn ActivityInfoSource>, capacity: usize) -> Self {
        Self {
            source,
            cache: Arc::new(TaskKeyLruCache::new(capacity)),
            default_icons: Arc::new(Mutex::new(HashMap::new())),
            listener: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the listener notified after an entry is loaded or invalidated.
    pub fn set_visuals_listener(&self, listener: Arc<dyn TaskVisualsChangeListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn TaskVisualsChangeListener>> {
        self.listener.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resolve the icon entry of `task`.
    ///
    /// A task that already carries an icon is answered without touching the
    /// cache. Platform failures degrade to the default icon; this never fails.
    pub async fn get_icon(&self, task: &Task) -> TaskCacheEntry {
        if let Some(icon) = &task.icon {
            return entry_from_task(task, icon.clone());
        }
        if let Some(entry) = self.cache.get(&task.key) {
            return entry;
        }

        let source = Arc::clone(&self.source);
        let default_icons = Arc::clone(&self.default_icons);
        let key = task.key.clone();
        let description = task.description.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            resolve_entry(source.as_ref(), &default_icons, &key, &description)
        })
        .await;
        let entry = match resolved {
            Ok(entry) => entry,
            Err(err) => {
                warn!(task_id = %task.id(), error = %err, "Icon resolution did not complete");
                default_entry(self.source.as_ref(), &self.default_icons, &task.key, None)
            }
        };

        trace!(task_id = %task.id(), title = %entry.title, "Icon entry loaded");
        self.cache.put(task.key.clone(), entry.clone());
        if let Some(listener) = self.listener() {
            listener.on_task_icon_changed(task.id());
        }
        entry
    }

    /// Resolve the icon entry of `task` and hand it to `callback`.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn get_icon_in_background<F>(&self, task: Task, callback: F) -> CancellableTask
    where
        F: FnOnce(TaskCacheEntry) + Send + 'static,
    {
        let cache = self.clone();
        CancellableTask::spawn(async move {
            let entry = cache.get_icon(&task).await;
            callback(entry);
        })
    }

    /// Drop every cached entry.
    pub async fn clear_cache(&self) {
        let cache = Arc::clone(&self.cache);
        if let Err(err) = tokio::task::spawn_blocking(move || cache.clear()).await {
            warn!(error = %err, "Clearing the icon cache did not complete");
        }
    }

    /// Drop the entries of `package` for `user` and announce the change.
    ///
    /// Returns the number of removed entries.
    pub async fn invalidate_cache_entries(&self, package: &str, user: UserId) -> usize {
        let cache = Arc::clone(&self.cache);
        let target = package.to_owned();
        let removed = tokio::task::spawn_blocking(move || {
            cache.remove_matching(|key| key.matches_package(&target, user))
        })
        .await
        .unwrap_or_else(|err| {
            warn!(package, error = %err, "Icon invalidation did not complete");
            0
        });

        trace!(package, user = %user, removed, "Invalidated icon entries");
        if let Some(listener) = self.listener() {
            listener.on_task_icon_changed_for_package(package, user);
        }
        removed
    }

    /// Cached entry for `key`, without promoting it.
    pub fn cached(&self, key: &TaskKey) -> Option<TaskCacheEntry> {
        self.cache.peek(key)
    }

    /// Change the cache capacity.
    pub fn update_cache_size(&self, capacity: usize) {
        self.cache.resize(capacity);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Lookup counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn entry_from_task(task: &Task, icon: Icon) -> TaskCacheEntry {
    let title = task
        .title
        .clone()
        .or_else(|| task.description.label.clone())
        .unwrap_or_else(|| task.key.package().to_owned());
    let content_description = task.content_description.clone().unwrap_or_else(|| title.clone());
    TaskCacheEntry {
        icon,
        content_description,
        title,
    }
}

fn resolve_entry(
    source: &dyn ActivityInfoSource,
    default_icons: &Mutex<HashMap<UserId, Icon>>,
    key: &TaskKey,
    description: &TaskDescription,
) -> TaskCacheEntry {
    let needs_activity = description.icon.is_none() || description.label.is_none();
    let activity = if needs_activity {
        source.activity_info(key).unwrap_or_else(|err| {
            warn!(task_id = %key.id, error = %err, "Activity lookup failed, using defaults");
            None
        })
    } else {
        None
    };

    match description.icon.clone() {
        Some(bitmap) => {
            let title = description
                .label
                .clone()
                .or_else(|| activity.as_ref().map(|info| info.label.clone()))
                .unwrap_or_else(|| key.package().to_owned());
            TaskCacheEntry {
                icon: Icon::badged(bitmap, key.user_id),
                content_description: source.badged_label(&title, key.user_id),
                title,
            }
        }
        None => {
            let mut entry = default_entry(source, default_icons, key, activity.as_ref());
            if let Some(label) = &description.label {
                entry.content_description = source.badged_label(label, key.user_id);
                entry.title.clone_from(label);
            }
            entry
        }
    }
}

fn default_entry(
    source: &dyn ActivityInfoSource,
    default_icons: &Mutex<HashMap<UserId, Icon>>,
    key: &TaskKey,
    activity: Option<&ActivityInfo>,
) -> TaskCacheEntry {
    let icon = activity
        .and_then(|info| info.icon.clone())
        .map_or_else(
            || default_icon(source, default_icons, key.user_id),
            |bitmap| Icon::badged(bitmap, key.user_id),
        );
    let title = activity.map_or_else(|| key.package().to_owned(), |info| info.label.clone());
    TaskCacheEntry {
        icon,
        content_description: source.badged_label(&title, key.user_id),
        title,
    }
}

fn default_icon(
    source: &dyn ActivityInfoSource,
    default_icons: &Mutex<HashMap<UserId, Icon>>,
    user: UserId,
) -> Icon {
    default_icons
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(user)
        .or_insert_with(|| Icon::badged(source.default_icon(user), user))
        .clone()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use quickstep_core::id::TaskId;
    use quickstep_core::{Bitmap, ComponentName};
    use quickstep_platform::InMemoryPlatform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingListener {
        icon_events: AtomicUsize,
        package_events: AtomicUsize,
    }

    impl TaskVisualsChangeListener for RecordingListener {
        fn on_task_icon_changed(&self, _task_id: TaskId) {
            self.icon_events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_icon_changed_for_package(&self, _package: &str, _user: UserId) {
            self.package_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn task(id: i32, user: i32) -> Task {
        Task::new(TaskKey::new(
            TaskId(id),
            ComponentName::new(format!("com.example.app{id}"), "MainActivity"),
            UserId(user),
        ))
    }

    #[tokio::test]
    async fn carried_icon_skips_cache_and_platform() {
        let platform = Arc::new(InMemoryPlatform::synthetic(2));
        let cache = TaskIconCache::new(platform.clone(), 4);
        let mut task = task(1, 0);
        let icon = Icon::plain(Bitmap::solid(2, 2, [9; 4]));
        task.icon = Some(icon.clone());
        task.title = Some("Mail".to_owned());

        let entry = cache.get_icon(&task).await;

        assert_eq!(entry.icon, icon);
        assert_eq!(entry.title, "Mail");
        assert_eq!(cache.stats().lookups, 0);
        assert_eq!(platform.call_counts().activity_lookups, 0);
    }

    #[tokio::test]
    async fn miss_resolves_activity_then_hits_cache() {
        let platform = Arc::new(InMemoryPlatform::synthetic(4));
        let cache = TaskIconCache::new(platform.clone(), 4);
        let listener = Arc::new(RecordingListener::default());
        cache.set_visuals_listener(listener.clone());

        let work_task = task(4, 10);
        let first = cache.get_icon(&work_task).await;
        let second = cache.get_icon(&work_task).await;

        assert_eq!(first, second);
        assert_eq!(first.title, "App 4");
        assert_eq!(first.content_description, "Work App 4");
        assert_eq!(first.icon.badged_for, Some(UserId(10)));
        assert_eq!(platform.call_counts().activity_lookups, 1);
        assert_eq!(listener.icon_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn description_icon_and_label_win() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        let cache = TaskIconCache::new(platform.clone(), 4);
        let bitmap = Bitmap::solid(3, 3, [7; 4]);
        let task = task(1, 0).with_description(TaskDescription {
            label: Some("Inbox".to_owned()),
            icon: Some(bitmap.clone()),
        });

        let entry = cache.get_icon(&task).await;

        assert_eq!(entry.icon, Icon::plain(bitmap));
        assert_eq!(entry.title, "Inbox");
        assert_eq!(platform.call_counts().activity_lookups, 0);
    }

    #[tokio::test]
    async fn unavailable_platform_degrades_to_default_icon() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        platform.set_unavailable(true);
        let cache = TaskIconCache::new(platform.clone(), 4);

        let entry = cache.get_icon(&task(1, 0)).await;

        assert_eq!(entry.icon.bitmap, platform.default_icon(UserId::SYSTEM));
        assert_eq!(entry.title, "com.example.app1");
    }

    #[tokio::test]
    async fn invalidation_drops_matching_package_and_user() {
        let platform = Arc::new(InMemoryPlatform::synthetic(3));
        let cache = TaskIconCache::new(platform, 8);
        let listener = Arc::new(RecordingListener::default());
        cache.set_visuals_listener(listener.clone());
        let kept = task(2, 0);
        let dropped = task(1, 0);
        cache.get_icon(&kept).await;
        cache.get_icon(&dropped).await;

        let removed = cache.invalidate_cache_entries("com.example.app1", UserId::SYSTEM).await;

        assert_eq!(removed, 1);
        assert!(cache.cached(&dropped.key).is_none());
        assert!(cache.cached(&kept.key).is_some());
        assert_eq!(listener.package_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_request_delivers_to_callback() {
        let platform = Arc::new(InMemoryPlatform::synthetic(1));
        let cache = TaskIconCache::new(platform, 4);
        let (tx, rx) = tokio::sync::oneshot::channel();

        let request = cache.get_icon_in_background(task(1, 0), move |entry| {
            let _ = tx.send(entry.title);
        });

        assert!(request.join().await);
        assert_eq!(rx.await.unwrap(), "App 1");
    }

    #[tokio::test]
    async fn clear_cache_empties_entries() {
        let platform = Arc::new(InMemoryPlatform::synthetic(2));
        let cache = TaskIconCache::new(platform, 4);
        cache.get_icon(&task(1, 0)).await;
        cache.get_icon(&task(2, 0)).await;
        assert_eq!(cache.len(), 2);

        cache.clear_cache().await;

        assert!(cache.is_empty());
    }
}
