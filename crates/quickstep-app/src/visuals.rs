//! Routing of icon/thumbnail change notifications to per-task callbacks.
//!
//! The caches publish into a [`TaskVisualsChangeNotifier`]. The
//! [`TaskVisualsChangedDelegate`] subscribes to that notifier (and to the
//! high-res loading state) only while at least one per-task callback is
//! registered, and forwards each event to the interested callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use quickstep_core::id::{TaskId, UserId};
use quickstep_core::{TaskKey, ThumbnailData};
use tracing::trace;

use crate::high_res::{HighResCallbackId, HighResLoadingStateNotifier};

/// Low-level visual change events published by the caches.
pub trait TaskVisualsChangeListener: Send + Sync {
    /// The icon of one task changed.
    fn on_task_icon_changed(&self, _task_id: TaskId) {}

    /// Icons of every task of `package` for `user` changed.
    fn on_task_icon_changed_for_package(&self, _package: &str, _user: UserId) {}

    /// A new snapshot of a task is available.
    fn on_task_thumbnail_changed(&self, _task_id: TaskId, _thumbnail: &ThumbnailData) {}
}

/// Registration handle for [`TaskVisualsChangeNotifier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Broadcast hub for [`TaskVisualsChangeListener`] events.
///
/// Listeners are held weakly; dead ones are pruned on broadcast.
#[derive(Default)]
pub struct TaskVisualsChangeNotifier {
    listeners: Mutex<Vec<(ListenerId, Weak<dyn TaskVisualsChangeListener>)>>,
    next_id: AtomicU64,
}

impl TaskVisualsChangeNotifier {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Weak<dyn TaskVisualsChangeListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe a listener.
    pub fn add_listener(&self, listener: Weak<dyn TaskVisualsChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, listener));
        id
    }

    /// Unsubscribe a listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners().retain(|(existing, _)| *existing != id);
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn live_listeners(&self) -> Vec<Arc<dyn TaskVisualsChangeListener>> {
        let mut listeners = self.listeners();
        listeners.retain(|(_, listener)| listener.strong_count() > 0);
        listeners
            .iter()
            .filter_map(|(_, listener)| listener.upgrade())
            .collect()
    }
}

impl TaskVisualsChangeListener for TaskVisualsChangeNotifier {
    fn on_task_icon_changed(&self, task_id: TaskId) {
        for listener in self.live_listeners() {
            listener.on_task_icon_changed(task_id);
        }
    }

    fn on_task_icon_changed_for_package(&self, package: &str, user: UserId) {
        for listener in self.live_listeners() {
            listener.on_task_icon_changed_for_package(package, user);
        }
    }

    fn on_task_thumbnail_changed(&self, task_id: TaskId, thumbnail: &ThumbnailData) {
        for listener in self.live_listeners() {
            listener.on_task_thumbnail_changed(task_id, thumbnail);
        }
    }
}

/// Per-task icon invalidation callback.
pub trait TaskIconChangedCallback: Send + Sync {
    /// The task's icon must be reloaded.
    fn on_task_icon_changed(&self);
}

/// Per-task thumbnail callback.
pub trait TaskThumbnailChangedCallback: Send + Sync {
    /// A new snapshot was published for the task.
    fn on_task_thumbnail_changed(&self, thumbnail: Option<ThumbnailData>);

    /// The desired resolution tier changed; `enabled` is the new tier.
    fn on_high_res_loading_state_changed(&self, enabled: bool);
}

/// Upstream subscription held only while there is demand for it.
///
/// Subscribes on the no-demand → demand transition and unsubscribes on the
/// reverse one. The caller serializes calls to [`update`](Self::update).
#[derive(Debug)]
pub struct DemandSubscription<T> {
    token: Option<T>,
}

impl<T> Default for DemandSubscription<T> {
    fn default() -> Self {
        Self { token: None }
    }
}

impl<T> DemandSubscription<T> {
    /// Unsubscribed helper.
    #[must_use]
    pub const fn new() -> Self {
        Self { token: None }
    }

    /// Whether the upstream subscription is held.
    pub const fn is_subscribed(&self) -> bool {
        self.token.is_some()
    }

    /// Apply a demand transition.
    pub fn update(
        &mut self,
        had_demand: bool,
        has_demand: bool,
        subscribe: impl FnOnce() -> T,
        unsubscribe: impl FnOnce(T),
    ) {
        if !had_demand && has_demand && self.token.is_none() {
            self.token = Some(subscribe());
        } else if had_demand
            && !has_demand
            && let Some(token) = self.token.take()
        {
            unsubscribe(token);
        }
    }
}

type IconEntry = (TaskKey, Arc<dyn TaskIconChangedCallback>);
type ThumbnailEntry = (TaskKey, Arc<dyn TaskThumbnailChangedCallback>);

#[derive(Default)]
struct CallbackRegistry {
    icon: HashMap<TaskId, IconEntry>,
    thumbnail: HashMap<TaskId, ThumbnailEntry>,
}

impl CallbackRegistry {
    fn has_any(&self) -> bool {
        !self.icon.is_empty() || !self.thumbnail.is_empty()
    }
}

#[derive(Default)]
struct Subscriptions {
    visuals: DemandSubscription<ListenerId>,
    high_res: DemandSubscription<HighResCallbackId>,
}

/// Demand-driven fan-out of visual change events to per-task callbacks.
pub struct TaskVisualsChangedDelegate {
    weak_self: Weak<Self>,
    visuals_notifier: Arc<TaskVisualsChangeNotifier>,
    high_res_notifier: Arc<dyn HighResLoadingStateNotifier>,
    // Lock order: `subscriptions` before `callbacks`. Upstream notifiers are
    // only called with `subscriptions` held.
    subscriptions: Mutex<Subscriptions>,
    callbacks: Mutex<CallbackRegistry>,
}

impl TaskVisualsChangedDelegate {
    /// Create a delegate wired to its two upstream notifiers.
    pub fn new(
        visuals_notifier: Arc<TaskVisualsChangeNotifier>,
        high_res_notifier: Arc<dyn HighResLoadingStateNotifier>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            visuals_notifier,
            high_res_notifier,
            subscriptions: Mutex::new(Subscriptions::default()),
            callbacks: Mutex::new(CallbackRegistry::default()),
        })
    }

    fn callbacks(&self) -> MutexGuard<'_, CallbackRegistry> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the icon callback of a task, replacing any previous one.
    pub fn register_task_icon_changed_callback(
        &self,
        key: &TaskKey,
        callback: Arc<dyn TaskIconChangedCallback>,
    ) {
        self.mutate(|registry| {
            registry.icon.insert(key.id, (key.clone(), callback));
        });
    }

    /// Remove the icon callback registered under exactly `key`.
    pub fn unregister_task_icon_changed_callback(&self, key: &TaskKey) {
        self.mutate(|registry| {
            if registry.icon.get(&key.id).is_some_and(|(registered, _)| registered == key) {
                registry.icon.remove(&key.id);
            }
        });
    }

    /// Register the thumbnail callback of a task, replacing any previous one.
    pub fn register_task_thumbnail_changed_callback(
        &self,
        key: &TaskKey,
        callback: Arc<dyn TaskThumbnailChangedCallback>,
    ) {
        self.mutate(|registry| {
            registry.thumbnail.insert(key.id, (key.clone(), callback));
        });
    }

    /// Remove the thumbnail callback registered under exactly `key`.
    pub fn unregister_task_thumbnail_changed_callback(&self, key: &TaskKey) {
        self.mutate(|registry| {
            if registry.thumbnail.get(&key.id).is_some_and(|(registered, _)| registered == key) {
                registry.thumbnail.remove(&key.id);
            }
        });
    }

    /// Whether any callback is registered for `task_id`.
    pub fn has_callbacks_for(&self, task_id: TaskId) -> bool {
        let registry = self.callbacks();
        registry.icon.contains_key(&task_id) || registry.thumbnail.contains_key(&task_id)
    }

    /// Whether the upstream notifiers are currently subscribed.
    pub fn is_subscribed(&self) -> bool {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        subscriptions.visuals.is_subscribed() && subscriptions.high_res.is_subscribed()
    }

    fn mutate(&self, change: impl FnOnce(&mut CallbackRegistry)) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let (had_any, has_any) = {
            let mut registry = self.callbacks();
            let had_any = registry.has_any();
            change(&mut registry);
            (had_any, registry.has_any())
        };
        if had_any == has_any {
            return;
        }
        trace!(has_any, "Visuals callback demand changed");

        let listener: Weak<dyn TaskVisualsChangeListener> = self.weak_self.clone();
        subscriptions.visuals.update(
            had_any,
            has_any,
            || self.visuals_notifier.add_listener(listener),
            |id| self.visuals_notifier.remove_listener(id),
        );

        let weak_self = self.weak_self.clone();
        subscriptions.high_res.update(
            had_any,
            has_any,
            || {
                self.high_res_notifier.add_high_res_callback(Arc::new(move |enabled| {
                    if let Some(delegate) = weak_self.upgrade() {
                        delegate.on_high_res_loading_state_changed(enabled);
                    }
                }))
            },
            |id| self.high_res_notifier.remove_high_res_callback(id),
        );
    }

    fn on_high_res_loading_state_changed(&self, enabled: bool) {
        let callbacks: Vec<Arc<dyn TaskThumbnailChangedCallback>> = self
            .callbacks()
            .thumbnail
            .values()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback.on_high_res_loading_state_changed(enabled);
        }
    }
}

impl TaskVisualsChangeListener for TaskVisualsChangedDelegate {
    fn on_task_icon_changed(&self, task_id: TaskId) {
        let callback = self
            .callbacks()
            .icon
            .get(&task_id)
            .map(|(_, callback)| Arc::clone(callback));
        if let Some(callback) = callback {
            callback.on_task_icon_changed();
        }
    }

    fn on_task_icon_changed_for_package(&self, package: &str, user: UserId) {
        let callbacks: Vec<Arc<dyn TaskIconChangedCallback>> = self
            .callbacks()
            .icon
            .values()
            .filter(|(key, _)| key.matches_package(package, user))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback.on_task_icon_changed();
        }
    }

    fn on_task_thumbnail_changed(&self, task_id: TaskId, thumbnail: &ThumbnailData) {
        let callback = self
            .callbacks()
            .thumbnail
            .get(&task_id)
            .map(|(_, callback)| Arc::clone(callback));
        if let Some(callback) = callback {
            callback.on_task_thumbnail_changed(Some(thumbnail.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::high_res::{HighResCallback, HighResLoadingState};
    use quickstep_core::ComponentName;
    use quickstep_core::id::SnapshotId;
    use std::sync::atomic::AtomicUsize;

    struct FakeHighRes {
        state: Mutex<HighResLoadingState>,
        adds: AtomicUsize,
        removes: AtomicUsize,
    }

    impl FakeHighRes {
        fn new() -> Self {
            Self {
                state: Mutex::new(HighResLoadingState::new(false)),
                adds: AtomicUsize::new(0),
                removes: AtomicUsize::new(0),
            }
        }

        fn set_visible(&self, visible: bool) {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).set_visible(visible);
        }
    }

    impl HighResLoadingStateNotifier for FakeHighRes {
        fn add_high_res_callback(&self, callback: HighResCallback) -> HighResCallbackId {
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .add_callback(callback)
        }

        fn remove_high_res_callback(&self, id: HighResCallbackId) {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_callback(id);
        }
    }

    #[derive(Default)]
    struct Counter {
        icon: AtomicUsize,
        thumbnail: AtomicUsize,
        high_res: AtomicUsize,
        last_tier: Mutex<Option<bool>>,
    }

    impl TaskIconChangedCallback for Counter {
        fn on_task_icon_changed(&self) {
            self.icon.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TaskThumbnailChangedCallback for Counter {
        fn on_task_thumbnail_changed(&self, _thumbnail: Option<ThumbnailData>) {
            self.thumbnail.fetch_add(1, Ordering::SeqCst);
        }

        fn on_high_res_loading_state_changed(&self, enabled: bool) {
            self.high_res.fetch_add(1, Ordering::SeqCst);
            *self.last_tier.lock().unwrap_or_else(PoisonError::into_inner) = Some(enabled);
        }
    }

    fn key(id: i32, package: &str, user: i32) -> TaskKey {
        TaskKey::new(TaskId(id), ComponentName::new(package, "Main"), UserId(user))
    }

    fn setup() -> (Arc<TaskVisualsChangeNotifier>, Arc<FakeHighRes>, Arc<TaskVisualsChangedDelegate>) {
        let notifier = Arc::new(TaskVisualsChangeNotifier::new());
        let high_res = Arc::new(FakeHighRes::new());
        let delegate = TaskVisualsChangedDelegate::new(
            Arc::clone(&notifier),
            Arc::clone(&high_res) as Arc<dyn HighResLoadingStateNotifier>,
        );
        (notifier, high_res, delegate)
    }

    #[test]
    fn subscribes_only_on_first_and_last_callback() {
        let (notifier, high_res, delegate) = setup();
        let counter = Arc::new(Counter::default());
        assert!(!delegate.is_subscribed());

        delegate.register_task_icon_changed_callback(&key(1, "a", 0), counter.clone());
        delegate.register_task_thumbnail_changed_callback(&key(1, "a", 0), counter.clone());
        delegate.register_task_icon_changed_callback(&key(2, "a", 0), counter.clone());
        assert!(delegate.is_subscribed());
        assert_eq!(notifier.listener_count(), 1);
        assert_eq!(high_res.adds.load(Ordering::SeqCst), 1);

        delegate.unregister_task_icon_changed_callback(&key(1, "a", 0));
        delegate.unregister_task_thumbnail_changed_callback(&key(1, "a", 0));
        assert!(delegate.is_subscribed());

        delegate.unregister_task_icon_changed_callback(&key(2, "a", 0));
        assert!(!delegate.is_subscribed());
        assert_eq!(notifier.listener_count(), 0);
        assert_eq!(high_res.removes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn icon_event_reaches_only_matching_task() {
        let (notifier, _high_res, delegate) = setup();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        delegate.register_task_icon_changed_callback(&key(1, "a", 0), first.clone());
        delegate.register_task_icon_changed_callback(&key(2, "a", 0), second.clone());

        notifier.on_task_icon_changed(TaskId(2));

        assert_eq!(first.icon.load(Ordering::SeqCst), 0);
        assert_eq!(second.icon.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn package_event_filters_by_package_and_user() {
        let (notifier, _high_res, delegate) = setup();
        let same = Arc::new(Counter::default());
        let other_user = Arc::new(Counter::default());
        let other_package = Arc::new(Counter::default());
        delegate.register_task_icon_changed_callback(&key(1, "mail", 0), same.clone());
        delegate.register_task_icon_changed_callback(&key(2, "mail", 10), other_user.clone());
        delegate.register_task_icon_changed_callback(&key(3, "maps", 0), other_package.clone());

        notifier.on_task_icon_changed_for_package("mail", UserId(0));

        assert_eq!(same.icon.load(Ordering::SeqCst), 1);
        assert_eq!(other_user.icon.load(Ordering::SeqCst), 0);
        assert_eq!(other_package.icon.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn high_res_change_broadcasts_to_every_thumbnail_callback() {
        let (_notifier, high_res, delegate) = setup();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        delegate.register_task_thumbnail_changed_callback(&key(1, "a", 0), first.clone());
        delegate.register_task_thumbnail_changed_callback(&key(2, "b", 0), second.clone());

        high_res.set_visible(true);

        assert_eq!(first.high_res.load(Ordering::SeqCst), 1);
        assert_eq!(second.high_res.load(Ordering::SeqCst), 1);
        assert_eq!(*second.last_tier.lock().unwrap_or_else(PoisonError::into_inner), Some(true));
    }

    #[test]
    fn unregister_with_stale_key_keeps_newer_callback() {
        let (_notifier, _high_res, delegate) = setup();
        let counter = Arc::new(Counter::default());
        delegate.register_task_icon_changed_callback(&key(1, "old", 0), counter.clone());
        delegate.register_task_icon_changed_callback(&key(1, "new", 0), counter.clone());

        delegate.unregister_task_icon_changed_callback(&key(1, "old", 0));
        assert!(delegate.has_callbacks_for(TaskId(1)));

        delegate.unregister_task_icon_changed_callback(&key(1, "new", 0));
        assert!(!delegate.has_callbacks_for(TaskId(1)));
        assert!(!delegate.is_subscribed());
    }

    #[test]
    fn thumbnail_event_carries_data_to_its_task() {
        let (notifier, _high_res, delegate) = setup();
        let counter = Arc::new(Counter::default());
        delegate.register_task_thumbnail_changed_callback(&key(7, "a", 0), counter.clone());

        let data = ThumbnailData {
            bitmap: None,
            reduced_resolution: false,
            snapshot_id: SnapshotId(3),
            scale: 1.0,
        };
        notifier.on_task_thumbnail_changed(TaskId(7), &data);
        notifier.on_task_thumbnail_changed(TaskId(8), &data);

        assert_eq!(counter.thumbnail.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn demand_subscription_ignores_steady_state() {
        let mut subscription = DemandSubscription::new();
        let mut subscribes = 0;
        subscription.update(false, true, || { subscribes += 1; 7 }, |_| {});
        subscription.update(true, true, || { subscribes += 1; 8 }, |_| {});
        assert_eq!(subscribes, 1);

        let mut released = None;
        subscription.update(true, false, || 9, |token| released = Some(token));
        assert_eq!(released, Some(7));
        assert!(!subscription.is_subscribed());
    }
}
