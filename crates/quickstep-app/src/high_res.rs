//! Decides whether thumbnails should be loaded at full resolution.

use std::fmt;
use std::sync::Arc;

/// Callback invoked with the new `is_enabled` value on every transition.
pub type HighResCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Registration handle returned by [`HighResLoadingState::add_callback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HighResCallbackId(u64);

/// Anything that can deliver high-res loading transitions to subscribers.
pub trait HighResLoadingStateNotifier: Send + Sync {
    /// Subscribe to transitions.
    fn add_high_res_callback(&self, callback: HighResCallback) -> HighResCallbackId;

    /// Unsubscribe. Unknown ids are ignored.
    fn remove_high_res_callback(&self, id: HighResCallbackId);
}

/// Reactive high-res state: `force_high_res || (visible && !flinging_fast)`.
///
/// Owned by one context. The `set_*` methods invoke callbacks synchronously,
/// most recently added first. The `update_*` methods only record the change
/// and return a [`HighResTransition`] so a caller holding a lock can deliver
/// it after releasing the lock.
pub struct HighResLoadingState {
    force_high_res: bool,
    visible: bool,
    flinging_fast: bool,
    enabled: bool,
    callbacks: Vec<(HighResCallbackId, HighResCallback)>,
    next_callback_id: u64,
}

impl fmt::Debug for HighResLoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighResLoadingState")
            .field("force_high_res", &self.force_high_res)
            .field("visible", &self.visible)
            .field("flinging_fast", &self.flinging_fast)
            .field("enabled", &self.enabled)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl HighResLoadingState {
    /// `force_high_res` is set when the platform cannot produce reduced snapshots.
    #[must_use]
    pub const fn new(force_high_res: bool) -> Self {
        Self {
            force_high_res,
            visible: false,
            flinging_fast: false,
            enabled: force_high_res,
            callbacks: Vec::new(),
            next_callback_id: 0,
        }
    }

    /// Whether full-resolution thumbnails should be requested.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the recents UI is on screen.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether the user is mid high-velocity scroll.
    #[must_use]
    pub const fn is_flinging_fast(&self) -> bool {
        self.flinging_fast
    }

    /// Register a transition callback.
    pub fn add_callback(&mut self, callback: HighResCallback) -> HighResCallbackId {
        let id = HighResCallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        self.callbacks.push((id, callback));
        id
    }

    /// Remove a transition callback.
    pub fn remove_callback(&mut self, id: HighResCallbackId) {
        self.callbacks.retain(|(existing, _)| *existing != id);
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Update visibility of the recents UI.
    pub fn set_visible(&mut self, visible: bool) {
        if let Some(transition) = self.update_visible(visible) {
            transition.notify();
        }
    }

    /// Update the fast-fling signal.
    pub fn set_flinging_fast(&mut self, flinging_fast: bool) {
        if let Some(transition) = self.update_flinging_fast(flinging_fast) {
            transition.notify();
        }
    }

    /// Record visibility without invoking callbacks.
    pub fn update_visible(&mut self, visible: bool) -> Option<HighResTransition> {
        self.visible = visible;
        self.update_state()
    }

    /// Record the fast-fling signal without invoking callbacks.
    pub fn update_flinging_fast(&mut self, flinging_fast: bool) -> Option<HighResTransition> {
        self.flinging_fast = flinging_fast;
        self.update_state()
    }

    fn update_state(&mut self) -> Option<HighResTransition> {
        let enabled = self.force_high_res || (self.visible && !self.flinging_fast);
        if enabled == self.enabled {
            return None;
        }
        self.enabled = enabled;
        Some(HighResTransition {
            enabled,
            callbacks: self.callbacks.iter().rev().map(|(_, callback)| Arc::clone(callback)).collect(),
        })
    }
}

/// A recorded change of the enabled flag, with the callbacks registered at
/// the time of the change.
#[must_use = "callbacks only run on `notify`"]
pub struct HighResTransition {
    enabled: bool,
    callbacks: Vec<HighResCallback>,
}

impl fmt::Debug for HighResTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighResTransition")
            .field("enabled", &self.enabled)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl HighResTransition {
    /// New value of the enabled flag.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Invoke the captured callbacks, most recently added first.
    pub fn notify(self) {
        for callback in &self.callbacks {
            callback(self.enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<(u8, bool)>>>, tag: u8) -> HighResCallback {
        let log = Arc::clone(log);
        Arc::new(move |enabled| {
            log.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((tag, enabled));
        })
    }

    #[test]
    fn transitions_fire_callbacks_once_per_change() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = HighResLoadingState::new(false);
        state.add_callback(recorder(&log, 1));
        assert!(!state.is_enabled());

        state.set_visible(true);
        assert!(state.is_enabled());
        state.set_flinging_fast(true);
        assert!(!state.is_enabled());
        state.set_flinging_fast(true);

        let log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(*log, vec![(1, true), (1, false)]);
    }

    #[test]
    fn callbacks_run_most_recent_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = HighResLoadingState::new(false);
        state.add_callback(recorder(&log, 1));
        state.add_callback(recorder(&log, 2));
        state.add_callback(recorder(&log, 3));

        state.set_visible(true);

        let log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(*log, vec![(3, true), (2, true), (1, true)]);
    }

    #[test]
    fn forced_high_res_never_transitions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = HighResLoadingState::new(true);
        state.add_callback(recorder(&log, 1));
        assert!(state.is_enabled());

        state.set_visible(true);
        state.set_flinging_fast(true);
        state.set_visible(false);

        assert!(state.is_enabled());
        assert!(log.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_empty());
    }

    #[test]
    fn recorded_transition_is_delivered_later() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = HighResLoadingState::new(false);
        state.add_callback(recorder(&log, 1));

        let transition = state.update_visible(true).unwrap();
        assert!(transition.enabled());
        assert!(state.update_visible(true).is_none());
        assert!(log.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_empty());

        transition.notify();
        assert_eq!(*log.lock().unwrap_or_else(std::sync::PoisonError::into_inner), vec![(1, true)]);
    }

    #[test]
    fn removed_callback_is_silent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = HighResLoadingState::new(false);
        let id = state.add_callback(recorder(&log, 1));
        state.remove_callback(id);
        state.set_visible(true);
        assert_eq!(state.callback_count(), 0);
        assert!(log.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_empty());
    }
}
