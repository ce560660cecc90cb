//! Collaborators the command helper drives: the overview surface, taskbar
//! quick switch and the recents animation machinery.

use std::sync::Arc;

use quickstep_core::id::{DisplayId, TaskId};
use tokio::sync::oneshot;

/// One task tile in the overview carousel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTile {
    /// Task shown by the tile.
    pub task_id: TaskId,
    /// The tile hosts the running task.
    pub running: bool,
    /// The tile is a large (focused or desktop) tile.
    pub large: bool,
}

impl TaskTile {
    /// Regular tile.
    #[must_use]
    pub const fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            running: false,
            large: false,
        }
    }
}

/// Overview carousel contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentsPage {
    /// Tiles in carousel order.
    pub tiles: Vec<TaskTile>,
    /// Index of the page the carousel is settling on.
    pub current_page: usize,
}

impl RecentsPage {
    /// Task on the current page.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.tiles.get(self.current_page).map(|tile| tile.task_id)
    }

    /// Task a toggle should launch: the tile after the running one (or the
    /// running one when it is last); without a running tile, the last large
    /// tile, else the first tile.
    #[must_use]
    pub fn next_toggled_task(&self) -> Option<TaskId> {
        let Some(running) = self.tiles.iter().position(|tile| tile.running) else {
            return self
                .tiles
                .iter()
                .rev()
                .find(|tile| tile.large)
                .or_else(|| self.tiles.first())
                .map(|tile| tile.task_id);
        };
        self.tiles
            .get(running + 1)
            .or_else(|| self.tiles.get(running))
            .map(|tile| tile.task_id)
    }
}

/// Overview UI of one display.
pub trait OverviewSurface: Send + Sync {
    /// Whether overview is on screen.
    fn is_visible(&self) -> bool;

    /// Whether overview is in the middle of a touch interaction.
    fn is_handling_touch(&self) -> bool;

    /// Carousel snapshot.
    fn page(&self) -> RecentsPage;

    /// Launch a task with an animation. The receiver resolves when the
    /// animation ends; `None` means the launch could not start.
    fn launch_task(&self, task_id: TaskId) -> Option<oneshot::Receiver<()>>;

    /// Animate overview to home.
    fn start_home(&self);

    /// Task index keyboard focus should land on when overview shows.
    fn set_keyboard_task_focus_index(&self, index: Option<usize>);

    /// If the launcher is already showing, switch it to overview. The
    /// receiver resolves once the switch completes.
    fn switch_to_recents_if_visible(&self) -> Option<oneshot::Receiver<()>>;
}

/// Taskbar quick switch on one display.
pub trait TaskbarQuickSwitch: Send + Sync {
    /// Whether the quick switch view may open now.
    fn allows_quick_switch(&self) -> bool;

    /// Launch the focused task of an open quick switch view; returns its
    /// index, or `None` when nothing was focused.
    fn launch_focused_task(&self) -> Option<usize>;

    /// Open the quick switch view.
    fn open_quick_switch_view(&self);
}

/// Recents animation lifecycle events.
pub trait RecentsAnimationListener: Send + Sync {
    /// The animation started and overview is ready.
    fn on_recents_animation_start(&self);

    /// The animation was canceled.
    fn on_recents_animation_canceled(&self);
}

/// Recents animation driver of one display.
pub trait TaskAnimationManager: Send + Sync {
    /// Whether a recents animation is running.
    fn is_recents_animation_running(&self) -> bool;

    /// Start a new recents animation.
    fn start_recents_animation(&self, display_id: DisplayId, listener: Arc<dyn RecentsAnimationListener>);

    /// Attach to the running recents animation.
    fn continue_recents_animation(&self, listener: Arc<dyn RecentsAnimationListener>);

    /// Cancel the running recents animation.
    fn cancel_recents_animation(&self);
}

/// Per-display lookup of overview collaborators.
pub trait OverviewEnvironment: Send + Sync {
    /// Overview surface of `display_id`, if the launcher is created there.
    fn overview(&self, display_id: DisplayId) -> Option<Arc<dyn OverviewSurface>>;

    /// Taskbar of `display_id`, if any.
    fn taskbar(&self, display_id: DisplayId) -> Option<Arc<dyn TaskbarQuickSwitch>>;

    /// Recents animation driver of `display_id`, if any.
    fn task_animation_manager(&self, display_id: DisplayId) -> Option<Arc<dyn TaskAnimationManager>>;

    /// Start the home activity directly.
    fn start_home_activity(&self, display_id: DisplayId);

    /// Every connected display.
    fn display_ids(&self) -> Vec<DisplayId>;
}
