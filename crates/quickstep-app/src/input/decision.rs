//! Ordered decision tree that picks the consumer chain for a new gesture.
//!
//! [`select_consumer`] is pure: the same context and event always produce the
//! same chain and the same reason trace.

use std::fmt;

use quickstep_core::id::{DisplayId, TaskId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{InputConsumer, LeafKind, MotionEvent, WrapperKind};

/// Device-wide predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    /// The user has unlocked the device.
    pub user_unlocked: bool,
    /// Keyguard is showing but occluded by an activity.
    pub keyguard_showing_occluded: bool,
    /// Navigation mode is fully gestural.
    pub fully_gestural_navigation: bool,
    /// A system gesture may start now.
    pub can_start_system_gesture: bool,
    /// A trackpad gesture may start now.
    pub can_start_trackpad_gesture: bool,
    /// An assistant is installed.
    pub assistant_available: bool,
    /// The assistant gesture is allowed in the current state.
    pub can_trigger_assistant_action: bool,
    /// Bubbles are expanded.
    pub bubbles_expanded: bool,
    /// A system UI dialog is showing.
    pub system_ui_dialog_showing: bool,
    /// Long press on the navigation handle is enabled.
    pub nav_handle_long_press_enabled: bool,
    /// Screen pinning is active.
    pub screen_pinning_active: bool,
    /// The one-handed gesture is allowed.
    pub can_trigger_one_handed_action: bool,
    /// The accessibility menu is available.
    pub accessibility_menu_available: bool,
}

/// Task in the foreground when the gesture started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    /// Task id.
    pub task_id: TaskId,
    /// The task blocks system gestures.
    #[serde(default)]
    pub gesture_blocked: bool,
    /// The task is hosted by the launcher itself.
    #[serde(default)]
    pub launcher_child: bool,
}

/// State of the gesture being started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureState {
    /// Display the gesture started on.
    pub display_id: DisplayId,
    /// The gesture comes from a trackpad.
    pub trackpad_gesture: bool,
    /// Foreground task, if any.
    pub running_task: Option<RunningTask>,
    /// A swipe progress delegate was registered for this gesture.
    pub progress_delegate_registered: bool,
}

/// State carried over from the previous gesture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviousGestureState {
    /// A recents animation is still running.
    pub recents_animation_running: bool,
    /// The previous gesture was animating to the launcher.
    pub animating_to_launcher: bool,
}

/// Axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Right edge, exclusive.
    pub right: f32,
    /// Bottom edge, exclusive.
    pub bottom: f32,
}

impl Rect {
    /// Whether the point lies inside.
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Taskbar state on the gesture's display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskbarState {
    /// The taskbar is shown in apps.
    pub present: bool,
    /// The device is in phone mode (no persistent taskbar).
    pub phone_mode: bool,
    /// The taskbar is stashed over the launcher.
    pub in_stashed_launcher_state: bool,
}

/// Launcher and overview state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherState {
    /// Bubble bar bounds when the bar is shown.
    pub bubble_bar_bounds: Option<Rect>,
    /// Overview shows the live tile of the running task.
    pub in_live_tile_mode: bool,
    /// The launcher was resumed through a shell transition.
    pub launcher_resumed_through_shell_transition: bool,
    /// Overview input handling is forced.
    pub force_overview_input_consumer: bool,
    /// The overview window has focus.
    pub overview_has_focus: bool,
    /// Taskbar on the gesture's display.
    pub taskbar: Option<TaskbarState>,
}

/// Everything the decision reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerContext {
    /// Device predicates.
    pub device: DeviceState,
    /// Current gesture.
    pub gesture: GestureState,
    /// Previous gesture.
    pub previous: PreviousGestureState,
    /// Launcher state.
    pub launcher: LauncherState,
}

/// Human-readable explanation of the branches taken. Never affects the
/// decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReasonTrace(Vec<String>);

impl ReasonTrace {
    fn push(&mut self, reason: impl Into<String>) {
        self.0.push(reason.into());
    }

    /// Recorded reasons in order.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ReasonTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Selected consumer with its trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSelection {
    /// Consumer chain.
    pub consumer: InputConsumer,
    /// Why it was selected.
    pub reasons: ReasonTrace,
}

/// Select the consumer for the gesture starting with `event`.
#[must_use]
pub fn select_consumer(ctx: &ConsumerContext, event: &MotionEvent) -> ConsumerSelection {
    let mut trace = ReasonTrace::default();
    let consumer = decide(ctx, event, &mut trace);
    ConsumerSelection {
        consumer,
        reasons: trace,
    }
}

/// Select the consumer and log the decision once.
#[must_use]
pub fn new_consumer(ctx: &ConsumerContext, event: &MotionEvent) -> InputConsumer {
    let ConsumerSelection { consumer, reasons } = select_consumer(ctx, event);
    debug!(
        display_id = %consumer.display_id(),
        consumer = %consumer,
        reasons = %reasons,
        "Selected input consumer"
    );
    consumer
}

fn decide(ctx: &ConsumerContext, event: &MotionEvent, trace: &mut ReasonTrace) -> InputConsumer {
    let display = ctx.gesture.display_id;
    let device = &ctx.device;

    if let Some(bounds) = ctx.launcher.bubble_bar_bounds
        && bounds.contains(event.x, event.y)
    {
        trace.push("event is within bubble bar bounds");
        return InputConsumer::leaf(display, LeafKind::BubbleBar);
    }

    if ctx.gesture.progress_delegate_registered {
        trace.push("progress delegate registered");
        return InputConsumer::leaf(display, LeafKind::ProgressDelegate);
    }

    if !device.user_unlocked {
        trace.push("device is locked");
        if can_start_gesture(ctx) {
            trace.push("system gesture can start");
            return device_locked_consumer(ctx, trace);
        }
        trace.push("system gesture cannot start");
        return default_consumer(ctx, trace);
    }

    let can_start = can_start_gesture(ctx);
    let previous_animation = ctx.previous.recents_animation_running;
    if !can_start && !previous_animation {
        trace.push("system gesture cannot start and no recents animation is running");
        let consumer = default_consumer(ctx, trace);
        if device.screen_pinning_active {
            trace.push("screen pinning is active");
            return consumer;
        }
        return wrap_trailing(ctx, consumer, trace);
    }

    let mut consumer = base_consumer(ctx, trace);

    if device.assistant_available && device.can_trigger_assistant_action {
        trace.push("assistant gesture allowed");
        consumer = consumer.wrap(WrapperKind::Assistant);
    }

    if let Some(taskbar) = ctx.launcher.taskbar
        && !taskbar.phone_mode
        && (taskbar.present || taskbar.in_stashed_launcher_state)
        && !consumer.is_consumer_type(super::ConsumerFlags::ASSISTANT)
    {
        trace.push("taskbar can be unstashed");
        consumer = consumer.wrap(WrapperKind::TaskbarUnstash);
    }

    if device.bubbles_expanded {
        trace.push("bubbles are expanded, replacing with default consumer");
        consumer = default_consumer(ctx, trace);
    }

    if device.nav_handle_long_press_enabled && !ctx.gesture.trackpad_gesture {
        trace.push("navigation handle long press enabled");
        consumer = consumer.wrap(WrapperKind::NavHandleLongPress);
    }

    if device.system_ui_dialog_showing {
        trace.push("system UI dialog is showing");
        consumer = InputConsumer::leaf(display, LeafKind::SysUiOverlay);
    }

    if ctx.gesture.trackpad_gesture && can_start && !previous_animation {
        trace.push("trackpad gesture can pull down the status bar");
        consumer = consumer.wrap(WrapperKind::TrackpadStatusBar);
    }

    if device.screen_pinning_active {
        trace.push("screen pinning is active");
        return InputConsumer::leaf(display, LeafKind::ScreenPinned);
    }

    wrap_trailing(ctx, consumer, trace)
}

fn wrap_trailing(ctx: &ConsumerContext, mut consumer: InputConsumer, trace: &mut ReasonTrace) -> InputConsumer {
    if ctx.device.can_trigger_one_handed_action {
        trace.push("one-handed gesture allowed");
        consumer = consumer.wrap(WrapperKind::OneHanded);
    }
    if ctx.device.accessibility_menu_available {
        trace.push("accessibility menu available");
        consumer = consumer.wrap(WrapperKind::AccessibilityMenu);
    }
    consumer
}

const fn can_start_gesture(ctx: &ConsumerContext) -> bool {
    if ctx.gesture.trackpad_gesture {
        ctx.device.can_start_trackpad_gesture
    } else {
        ctx.device.can_start_system_gesture
    }
}

fn base_consumer(ctx: &ConsumerContext, trace: &mut ReasonTrace) -> InputConsumer {
    let display = ctx.gesture.display_id;

    if ctx.device.keyguard_showing_occluded {
        trace.push("keyguard is showing occluded");
        return device_locked_consumer(ctx, trace);
    }

    if ctx.launcher.in_live_tile_mode {
        trace.push("overview is in live tile mode");
        return overview_consumer(ctx, trace);
    }

    let Some(running_task) = &ctx.gesture.running_task else {
        trace.push("no running task");
        return default_consumer(ctx, trace);
    };

    if ctx.previous.animating_to_launcher
        || ctx.launcher.launcher_resumed_through_shell_transition
        || ctx.launcher.force_overview_input_consumer
    {
        trace.push("previous gesture animated to launcher or overview input is forced");
        return overview_consumer(ctx, trace);
    }

    if running_task.gesture_blocked || running_task.launcher_child {
        trace.push(format!("running task {} does not accept the gesture", running_task.task_id));
        return default_consumer(ctx, trace);
    }

    trace.push(format!("swiping up from running task {}", running_task.task_id));
    InputConsumer::leaf(display, LeafKind::OtherActivity)
}

fn overview_consumer(ctx: &ConsumerContext, trace: &mut ReasonTrace) -> InputConsumer {
    let has_focus = ctx.launcher.overview_has_focus;
    if !has_focus {
        trace.push("overview window has no focus");
    }
    InputConsumer::leaf(ctx.gesture.display_id, LeafKind::Overview { has_focus })
}

fn device_locked_consumer(ctx: &ConsumerContext, trace: &mut ReasonTrace) -> InputConsumer {
    let gesture_navigation = ctx.device.fully_gestural_navigation || ctx.gesture.trackpad_gesture;
    if gesture_navigation && ctx.gesture.running_task.is_some() {
        trace.push("gestural navigation with a running task");
        return InputConsumer::leaf(ctx.gesture.display_id, LeafKind::DeviceLocked);
    }
    trace.push("device locked consumer unavailable");
    default_consumer(ctx, trace)
}

fn default_consumer(ctx: &ConsumerContext, trace: &mut ReasonTrace) -> InputConsumer {
    let kind = if ctx.previous.recents_animation_running {
        trace.push("recents animation running, resetting gesture");
        LeafKind::ResetGesture
    } else {
        LeafKind::NoOp
    };
    InputConsumer::leaf(ctx.gesture.display_id, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ConsumerFlags, MotionAction};

    fn down() -> MotionEvent {
        MotionEvent::new(MotionAction::Down, 100.0, 1900.0)
    }

    fn unlocked_with_task() -> ConsumerContext {
        ConsumerContext {
            device: DeviceState {
                user_unlocked: true,
                fully_gestural_navigation: true,
                can_start_system_gesture: true,
                ..DeviceState::default()
            },
            gesture: GestureState {
                running_task: Some(RunningTask {
                    task_id: TaskId(42),
                    gesture_blocked: false,
                    launcher_child: false,
                }),
                ..GestureState::default()
            },
            ..ConsumerContext::default()
        }
    }

    fn name(ctx: &ConsumerContext) -> String {
        select_consumer(ctx, &down()).consumer.name()
    }

    #[test]
    fn plain_swipe_uses_other_activity() {
        let selection = select_consumer(&unlocked_with_task(), &down());
        assert_eq!(selection.consumer.consumer_type(), ConsumerFlags::OTHER_ACTIVITY);
        assert!(!selection.reasons.reasons().is_empty());
    }

    #[test]
    fn bubble_bar_region_wins_over_everything() {
        let mut ctx = unlocked_with_task();
        ctx.device.user_unlocked = false;
        ctx.gesture.progress_delegate_registered = true;
        ctx.launcher.bubble_bar_bounds = Some(Rect {
            left: 0.0,
            top: 1800.0,
            right: 200.0,
            bottom: 2000.0,
        });
        assert_eq!(name(&ctx), "BubbleBar");

        ctx.launcher.bubble_bar_bounds = Some(Rect::default());
        assert_eq!(name(&ctx), "ProgressDelegate");
    }

    #[test]
    fn locked_device_needs_gesture_and_running_task() {
        let mut ctx = unlocked_with_task();
        ctx.device.user_unlocked = false;
        assert_eq!(name(&ctx), "DeviceLocked");

        ctx.gesture.running_task = None;
        assert_eq!(name(&ctx), "NoOp");

        ctx.device.can_start_system_gesture = false;
        ctx.previous.recents_animation_running = true;
        assert_eq!(name(&ctx), "ResetGesture");
    }

    #[test]
    fn base_consumer_follows_launcher_state() {
        let mut ctx = unlocked_with_task();
        ctx.previous.animating_to_launcher = true;
        assert_eq!(name(&ctx), "OverviewWithoutFocus");

        ctx.launcher.overview_has_focus = true;
        assert_eq!(name(&ctx), "Overview");

        ctx.previous.animating_to_launcher = false;
        ctx.gesture.running_task = Some(RunningTask {
            task_id: TaskId(7),
            gesture_blocked: true,
            launcher_child: false,
        });
        assert_eq!(name(&ctx), "NoOp");

        ctx.device.keyguard_showing_occluded = true;
        assert_eq!(name(&ctx), "DeviceLocked");
    }

    #[test]
    fn wrappers_apply_in_fixed_order() {
        let mut ctx = unlocked_with_task();
        ctx.device.assistant_available = true;
        ctx.device.can_trigger_assistant_action = true;
        ctx.device.nav_handle_long_press_enabled = true;
        ctx.device.can_trigger_one_handed_action = true;
        ctx.device.accessibility_menu_available = true;
        assert_eq!(
            name(&ctx),
            "AccessibilityMenu(OneHanded(NavHandleLongPress(Assistant(OtherActivity))))"
        );
    }

    #[test]
    fn taskbar_unstash_is_skipped_under_assistant() {
        let mut ctx = unlocked_with_task();
        ctx.launcher.taskbar = Some(TaskbarState {
            present: true,
            phone_mode: false,
            in_stashed_launcher_state: false,
        });
        assert_eq!(name(&ctx), "TaskbarUnstash(OtherActivity)");

        ctx.device.assistant_available = true;
        ctx.device.can_trigger_assistant_action = true;
        assert_eq!(name(&ctx), "Assistant(OtherActivity)");
    }

    #[test]
    fn replace_branches_discard_earlier_wrappers() {
        let mut ctx = unlocked_with_task();
        ctx.device.assistant_available = true;
        ctx.device.can_trigger_assistant_action = true;
        ctx.device.bubbles_expanded = true;
        ctx.device.nav_handle_long_press_enabled = true;
        assert_eq!(name(&ctx), "NavHandleLongPress(NoOp)");

        ctx.device.system_ui_dialog_showing = true;
        assert_eq!(name(&ctx), "SysUiOverlay");
    }

    #[test]
    fn screen_pinning_is_terminal() {
        let mut ctx = unlocked_with_task();
        ctx.device.assistant_available = true;
        ctx.device.can_trigger_assistant_action = true;
        ctx.device.system_ui_dialog_showing = true;
        ctx.device.screen_pinning_active = true;
        ctx.device.can_trigger_one_handed_action = true;
        ctx.device.accessibility_menu_available = true;
        let selection = select_consumer(&ctx, &down());
        assert_eq!(selection.consumer.name(), "ScreenPinned");
        assert_eq!(selection.consumer.consumer_type(), ConsumerFlags::SCREEN_PINNED);
    }

    #[test]
    fn blocked_gesture_still_gets_trailing_wrappers() {
        let mut ctx = unlocked_with_task();
        ctx.device.can_start_system_gesture = false;
        ctx.device.can_trigger_one_handed_action = true;
        assert_eq!(name(&ctx), "OneHanded(NoOp)");

        ctx.device.screen_pinning_active = true;
        assert_eq!(name(&ctx), "NoOp");
    }

    #[test]
    fn trackpad_gesture_uses_trackpad_predicate() {
        let mut ctx = unlocked_with_task();
        ctx.gesture.trackpad_gesture = true;
        ctx.device.nav_handle_long_press_enabled = true;
        assert_eq!(name(&ctx), "NoOp");

        ctx.device.can_start_trackpad_gesture = true;
        assert_eq!(name(&ctx), "TrackpadStatusBar(OtherActivity)");

        ctx.previous.recents_animation_running = true;
        assert_eq!(name(&ctx), "OtherActivity");
    }

    #[test]
    fn consumer_is_bound_to_gesture_display() {
        let mut ctx = unlocked_with_task();
        ctx.gesture.display_id = DisplayId(3);
        assert_eq!(new_consumer(&ctx, &down()).display_id(), DisplayId(3));
    }

    #[test]
    fn context_parses_from_sparse_json() {
        let ctx: ConsumerContext = serde_json::from_str(
            r#"{
                "device": { "user_unlocked": true, "can_start_system_gesture": true },
                "gesture": { "running_task": { "task_id": 5 } }
            }"#,
        )
        .unwrap_or_else(|err| panic!("context should parse: {err}"));
        assert_eq!(name(&ctx), "OtherActivity");
    }
}
