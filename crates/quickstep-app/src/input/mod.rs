//! Input consumers and the per-gesture consumer selection.
//!
//! A consumer is a chain: a leaf that handles the gesture by default,
//! optionally wrapped by consumers that take over once the gesture shows
//! their hint.

pub mod decision;

use std::fmt;

use bitflags::bitflags;
use quickstep_core::id::DisplayId;
use serde::{Deserialize, Serialize};

pub use decision::{
    ConsumerContext, ConsumerSelection, DeviceState, GestureState, LauncherState,
    PreviousGestureState, ReasonTrace, Rect, RunningTask, TaskbarState, new_consumer,
    select_consumer,
};

bitflags! {
    /// Kinds present in a consumer chain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ConsumerFlags: u32 {
        /// Swallows the gesture.
        const NO_OP = 1 << 0;
        /// Overview with window focus.
        const OVERVIEW = 1 << 1;
        /// Swipe up from another app.
        const OTHER_ACTIVITY = 1 << 2;
        /// Assistant corner swipe.
        const ASSISTANT = 1 << 3;
        /// Swipe on the lock screen.
        const DEVICE_LOCKED = 1 << 4;
        /// Accessibility menu swipe.
        const ACCESSIBILITY = 1 << 5;
        /// Screen pinning exit gesture.
        const SCREEN_PINNED = 1 << 6;
        /// Overview without window focus.
        const OVERVIEW_WITHOUT_FOCUS = 1 << 7;
        /// Finishes a running recents animation.
        const RESET_GESTURE = 1 << 8;
        /// Externally registered swipe progress delegate.
        const PROGRESS_DELEGATE = 1 << 9;
        /// System UI dialog on top.
        const SYSUI_OVERLAY = 1 << 10;
        /// One-handed mode swipe down.
        const ONE_HANDED = 1 << 11;
        /// Taskbar unstash swipe.
        const TASKBAR_STASH = 1 << 12;
        /// Trackpad status bar pull down.
        const STATUS_BAR = 1 << 13;
        /// Navigation handle long press.
        const NAV_HANDLE_LONG_PRESS = 1 << 14;
        /// Bubble bar drag.
        const BUBBLE_BAR = 1 << 15;
    }
}

bitflags! {
    /// Gesture classification attached to motion events by the input layer.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GestureHints: u16 {
        /// Diagonal swipe from a bottom corner.
        const CORNER_SWIPE = 1 << 0;
        /// Swipe up starting on the stashed taskbar.
        const TASKBAR_SWIPE_UP = 1 << 1;
        /// Long press on the navigation handle.
        const NAV_HANDLE_LONG_PRESS = 1 << 2;
        /// Multi-finger trackpad swipe down.
        const TRACKPAD_SWIPE_DOWN = 1 << 3;
        /// Swipe down on the navigation bar.
        const SWIPE_DOWN = 1 << 4;
        /// Two-finger accessibility swipe.
        const ACCESSIBILITY_SWIPE = 1 << 5;
    }
}

/// Motion event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAction {
    /// First pointer down.
    Down,
    /// Pointer moved.
    Move,
    /// Last pointer up.
    Up,
    /// Gesture aborted.
    Cancel,
}

/// Single motion event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    /// Phase.
    pub action: MotionAction,
    /// Screen x.
    pub x: f32,
    /// Screen y.
    pub y: f32,
    /// Gesture hints recognized so far.
    #[serde(default)]
    pub hints: GestureHints,
}

impl MotionEvent {
    /// Event without hints.
    #[must_use]
    pub const fn new(action: MotionAction, x: f32, y: f32) -> Self {
        Self {
            action,
            x,
            y,
            hints: GestureHints::empty(),
        }
    }

    /// Same event with `hints` added.
    #[must_use]
    pub const fn with_hints(mut self, hints: GestureHints) -> Self {
        self.hints = self.hints.union(hints);
        self
    }

    const fn as_cancel(self) -> Self {
        Self {
            action: MotionAction::Cancel,
            ..self
        }
    }
}

/// Consumers that handle a gesture on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeafKind {
    /// Drops the gesture.
    NoOp,
    /// Finishes the running recents animation.
    ResetGesture,
    /// Drags the bubble bar.
    BubbleBar,
    /// Forwards progress to an external delegate.
    ProgressDelegate,
    /// Swipe on the lock screen.
    DeviceLocked,
    /// Swipe while overview is showing.
    Overview {
        /// Whether the overview window has input focus.
        has_focus: bool,
    },
    /// Swipe up from another app.
    OtherActivity,
    /// Screen pinning exit gesture.
    ScreenPinned,
    /// Swipe while a system UI dialog is showing.
    SysUiOverlay,
}

impl LeafKind {
    const fn flags(self) -> ConsumerFlags {
        match self {
            Self::NoOp => ConsumerFlags::NO_OP,
            Self::ResetGesture => ConsumerFlags::RESET_GESTURE,
            Self::BubbleBar => ConsumerFlags::BUBBLE_BAR,
            Self::ProgressDelegate => ConsumerFlags::PROGRESS_DELEGATE,
            Self::DeviceLocked => ConsumerFlags::DEVICE_LOCKED,
            Self::Overview { has_focus: true } => ConsumerFlags::OVERVIEW,
            Self::Overview { has_focus: false } => ConsumerFlags::OVERVIEW_WITHOUT_FOCUS,
            Self::OtherActivity => ConsumerFlags::OTHER_ACTIVITY,
            Self::ScreenPinned => ConsumerFlags::SCREEN_PINNED,
            Self::SysUiOverlay => ConsumerFlags::SYSUI_OVERLAY,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::ResetGesture => "ResetGesture",
            Self::BubbleBar => "BubbleBar",
            Self::ProgressDelegate => "ProgressDelegate",
            Self::DeviceLocked => "DeviceLocked",
            Self::Overview { has_focus: true } => "Overview",
            Self::Overview { has_focus: false } => "OverviewWithoutFocus",
            Self::OtherActivity => "OtherActivity",
            Self::ScreenPinned => "ScreenPinned",
            Self::SysUiOverlay => "SysUiOverlay",
        }
    }
}

/// Consumers that wrap a base consumer and take over on their hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WrapperKind {
    /// Assistant corner swipe.
    Assistant,
    /// Taskbar unstash.
    TaskbarUnstash,
    /// Navigation handle long press.
    NavHandleLongPress,
    /// Trackpad status bar pull down.
    TrackpadStatusBar,
    /// One-handed mode.
    OneHanded,
    /// Accessibility menu.
    AccessibilityMenu,
}

impl WrapperKind {
    const fn flags(self) -> ConsumerFlags {
        match self {
            Self::Assistant => ConsumerFlags::ASSISTANT,
            Self::TaskbarUnstash => ConsumerFlags::TASKBAR_STASH,
            Self::NavHandleLongPress => ConsumerFlags::NAV_HANDLE_LONG_PRESS,
            Self::TrackpadStatusBar => ConsumerFlags::STATUS_BAR,
            Self::OneHanded => ConsumerFlags::ONE_HANDED,
            Self::AccessibilityMenu => ConsumerFlags::ACCESSIBILITY,
        }
    }

    const fn hint(self) -> GestureHints {
        match self {
            Self::Assistant => GestureHints::CORNER_SWIPE,
            Self::TaskbarUnstash => GestureHints::TASKBAR_SWIPE_UP,
            Self::NavHandleLongPress => GestureHints::NAV_HANDLE_LONG_PRESS,
            Self::TrackpadStatusBar => GestureHints::TRACKPAD_SWIPE_DOWN,
            Self::OneHanded => GestureHints::SWIPE_DOWN,
            Self::AccessibilityMenu => GestureHints::ACCESSIBILITY_SWIPE,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Assistant => "Assistant",
            Self::TaskbarUnstash => "TaskbarUnstash",
            Self::NavHandleLongPress => "NavHandleLongPress",
            Self::TrackpadStatusBar => "TrackpadStatusBar",
            Self::OneHanded => "OneHanded",
            Self::AccessibilityMenu => "AccessibilityMenu",
        }
    }
}

/// Whether a wrapper has taken over the gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DelegationState {
    /// Events go to the base consumer.
    Inactive,
    /// The wrapper consumes events; the base was cancelled.
    Active,
}

/// Node of a consumer chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerNode {
    /// Chain end.
    Leaf(LeafKind),
    /// Wrapper around `base`.
    Wrapper {
        /// Wrapper kind.
        kind: WrapperKind,
        /// Delegation state for the current gesture.
        state: DelegationState,
        /// Wrapped consumer.
        base: Box<InputConsumer>,
    },
}

/// Consumer chain bound to one display.
#[derive(Debug, Clone, PartialEq)]
pub struct InputConsumer {
    display_id: DisplayId,
    node: ConsumerNode,
    received: Vec<MotionAction>,
}

impl InputConsumer {
    /// Leaf consumer.
    #[must_use]
    pub const fn leaf(display_id: DisplayId, kind: LeafKind) -> Self {
        Self {
            display_id,
            node: ConsumerNode::Leaf(kind),
            received: Vec::new(),
        }
    }

    /// Wrap `self` with `kind`.
    #[must_use]
    pub fn wrap(self, kind: WrapperKind) -> Self {
        Self {
            display_id: self.display_id,
            node: ConsumerNode::Wrapper {
                kind,
                state: DelegationState::Inactive,
                base: Box::new(self),
            },
            received: Vec::new(),
        }
    }

    /// Display the gesture started on.
    #[must_use]
    pub const fn display_id(&self) -> DisplayId {
        self.display_id
    }

    /// Chain node.
    #[must_use]
    pub const fn node(&self) -> &ConsumerNode {
        &self.node
    }

    /// Wrapped consumer, if this is a wrapper.
    #[must_use]
    pub fn base(&self) -> Option<&Self> {
        match &self.node {
            ConsumerNode::Leaf(_) => None,
            ConsumerNode::Wrapper { base, .. } => Some(base),
        }
    }

    /// Union of the kinds along the chain.
    #[must_use]
    pub fn consumer_type(&self) -> ConsumerFlags {
        match &self.node {
            ConsumerNode::Leaf(kind) => kind.flags(),
            ConsumerNode::Wrapper { kind, base, .. } => kind.flags() | base.consumer_type(),
        }
    }

    /// Whether this consumer alone (not its base) is of `flags`.
    #[must_use]
    pub fn is_consumer_type(&self, flags: ConsumerFlags) -> bool {
        let own = match &self.node {
            ConsumerNode::Leaf(kind) => kind.flags(),
            ConsumerNode::Wrapper { kind, .. } => kind.flags(),
        };
        own.contains(flags)
    }

    /// Chain name, e.g. `Assistant(OtherActivity)`.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.node {
            ConsumerNode::Leaf(kind) => kind.name().to_owned(),
            ConsumerNode::Wrapper { kind, base, .. } => format!("{}({})", kind.name(), base.name()),
        }
    }

    /// Consumer currently handling the gesture.
    #[must_use]
    pub fn active_consumer_in_hierarchy(&self) -> &Self {
        match &self.node {
            ConsumerNode::Wrapper {
                state: DelegationState::Inactive,
                base,
                ..
            } => base.active_consumer_in_hierarchy(),
            _ => self,
        }
    }

    /// Actions this consumer handled itself.
    #[must_use]
    pub fn received_actions(&self) -> &[MotionAction] {
        &self.received
    }

    /// Dispatch one event down the chain. Returns the type of the consumer
    /// that handled it.
    pub fn on_motion_event(&mut self, event: &MotionEvent) -> ConsumerFlags {
        match &mut self.node {
            ConsumerNode::Leaf(kind) => {
                let flags = kind.flags();
                self.received.push(event.action);
                flags
            }
            ConsumerNode::Wrapper { kind, state, base } => {
                if *state == DelegationState::Inactive {
                    if !event.hints.contains(kind.hint()) {
                        return base.on_motion_event(event);
                    }
                    *state = DelegationState::Active;
                    base.on_motion_event(&event.as_cancel());
                }
                let flags = kind.flags();
                self.received.push(event.action);
                flags
            }
        }
    }
}

impl fmt::Display for InputConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> InputConsumer {
        InputConsumer::leaf(DisplayId::DEFAULT, LeafKind::OtherActivity)
            .wrap(WrapperKind::Assistant)
            .wrap(WrapperKind::OneHanded)
    }

    #[test]
    fn chain_reports_name_and_union_type() {
        let consumer = chain();
        assert_eq!(consumer.name(), "OneHanded(Assistant(OtherActivity))");
        assert_eq!(
            consumer.consumer_type(),
            ConsumerFlags::ONE_HANDED | ConsumerFlags::ASSISTANT | ConsumerFlags::OTHER_ACTIVITY
        );
        assert!(consumer.is_consumer_type(ConsumerFlags::ONE_HANDED));
        assert!(!consumer.is_consumer_type(ConsumerFlags::ASSISTANT));
    }

    #[test]
    fn events_reach_leaf_until_a_wrapper_hint_appears() {
        let mut consumer = chain();
        let down = MotionEvent::new(MotionAction::Down, 10.0, 10.0);
        assert_eq!(consumer.on_motion_event(&down), ConsumerFlags::OTHER_ACTIVITY);
        assert_eq!(
            consumer.active_consumer_in_hierarchy().consumer_type(),
            ConsumerFlags::OTHER_ACTIVITY
        );

        let corner = MotionEvent::new(MotionAction::Move, 12.0, 8.0).with_hints(GestureHints::CORNER_SWIPE);
        assert_eq!(consumer.on_motion_event(&corner), ConsumerFlags::ASSISTANT);
        let up = MotionEvent::new(MotionAction::Up, 14.0, 6.0);
        assert_eq!(consumer.on_motion_event(&up), ConsumerFlags::ASSISTANT);

        let assistant = consumer.base().unwrap_or_else(|| panic!("missing base"));
        assert_eq!(assistant.received_actions(), &[MotionAction::Move, MotionAction::Up]);
        let leaf = assistant.base().unwrap_or_else(|| panic!("missing leaf"));
        assert_eq!(leaf.received_actions(), &[MotionAction::Down, MotionAction::Cancel]);
        assert!(consumer.active_consumer_in_hierarchy().is_consumer_type(ConsumerFlags::ASSISTANT));
    }

    #[test]
    fn overview_flags_depend_on_focus() {
        let focused = InputConsumer::leaf(DisplayId::DEFAULT, LeafKind::Overview { has_focus: true });
        let unfocused = InputConsumer::leaf(DisplayId::DEFAULT, LeafKind::Overview { has_focus: false });
        assert_eq!(focused.consumer_type(), ConsumerFlags::OVERVIEW);
        assert_eq!(unfocused.consumer_type(), ConsumerFlags::OVERVIEW_WITHOUT_FOCUS);
        assert_eq!(unfocused.to_string(), "OverviewWithoutFocus");
    }
}
