//! Domain types & platform contracts for the quickstep recents core.

/// Identifier types.
pub mod id;
/// Contracts implemented by platform backends.
pub mod platform;

use crate::id::{DeskId, SnapshotId, TaskId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Component (package + activity class) that owns a task.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentName {
    /// Package name, e.g. `com.example.mail`.
    pub package: String,
    /// Fully qualified activity class.
    pub class_name: String,
}

impl ComponentName {
    /// Build a component from package and class.
    pub fn new(package: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class_name: class_name.into(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class_name)
    }
}

/// Immutable identity of a task, used as cache and map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Numeric task id.
    pub id: TaskId,
    /// Owning component.
    pub component: ComponentName,
    /// Owning user profile.
    pub user_id: UserId,
}

impl TaskKey {
    /// Build a key.
    pub const fn new(id: TaskId, component: ComponentName, user_id: UserId) -> Self {
        Self {
            id,
            component,
            user_id,
        }
    }

    /// Package that owns the task.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.component.package
    }

    /// Whether the key belongs to `package` for `user`.
    #[must_use]
    pub fn matches_package(&self, package: &str, user: UserId) -> bool {
        self.user_id == user && self.component.package == package
    }
}

/// Decoded image shared between caches and tasks.
///
/// Pixel storage is reference counted; cloning never copies pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    pixels: Arc<[u8]>,
}

impl Bitmap {
    /// Wrap raw RGBA pixels.
    pub fn new(width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Solid single-colour bitmap, used for defaults and placeholders.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let len = (width as usize) * (height as usize);
        let pixels: Vec<u8> = rgba.iter().copied().cycle().take(len * 4).collect();
        Self::new(width, height, pixels)
    }

    /// Raw pixel bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Approximate memory footprint in bytes.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.pixels.len()
    }
}

/// Application icon, optionally badged for a non-primary user profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Icon {
    /// Icon pixels.
    pub bitmap: Bitmap,
    /// User the icon carries a profile badge for, if any.
    pub badged_for: Option<UserId>,
}

impl Icon {
    /// Unbadged icon.
    #[must_use]
    pub const fn plain(bitmap: Bitmap) -> Self {
        Self {
            bitmap,
            badged_for: None,
        }
    }

    /// Icon badged for `user` when that user is a secondary profile.
    #[must_use]
    pub fn badged(bitmap: Bitmap, user: UserId) -> Self {
        Self {
            bitmap,
            badged_for: user.is_badged().then_some(user),
        }
    }
}

/// Visual description a task publishes about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskDescription {
    /// Label set by the running activity.
    pub label: Option<String>,
    /// Icon held in memory by the platform for this task.
    pub icon: Option<Bitmap>,
}

/// Captured task snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ThumbnailData {
    /// Snapshot pixels; `None` while nothing has been captured.
    pub bitmap: Option<Bitmap>,
    /// Whether this is the reduced-resolution tier.
    pub reduced_resolution: bool,
    /// Monotonic version of the snapshot.
    pub snapshot_id: SnapshotId,
    /// Scale of the bitmap relative to the task bounds.
    pub scale: f32,
}

impl ThumbnailData {
    /// Thumbnail with pixels.
    #[must_use]
    pub const fn new(bitmap: Bitmap, reduced_resolution: bool, snapshot_id: SnapshotId) -> Self {
        Self {
            bitmap: Some(bitmap),
            reduced_resolution,
            snapshot_id,
            scale: if reduced_resolution { 0.5 } else { 1.0 },
        }
    }

    /// Whether the thumbnail carries pixels.
    #[must_use]
    pub const fn has_bitmap(&self) -> bool {
        self.bitmap.is_some()
    }

    /// Whether this thumbnail satisfies a request for the given tier.
    ///
    /// Full-resolution data satisfies every request; reduced data only
    /// satisfies low-resolution requests.
    #[must_use]
    pub const fn satisfies(&self, low_resolution_requested: bool) -> bool {
        self.has_bitmap() && (!self.reduced_resolution || low_resolution_requested)
    }
}

/// Icon cache entry: icon plus accessibility and display strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCacheEntry {
    /// Resolved icon.
    pub icon: Icon,
    /// Badged label used for accessibility.
    pub content_description: String,
    /// Display title.
    pub title: String,
}

/// View model of one recent task.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    /// Identity.
    pub key: TaskKey,
    /// Description published by the task itself.
    pub description: TaskDescription,
    /// Loaded icon.
    pub icon: Option<Icon>,
    /// Loaded title.
    pub title: Option<String>,
    /// Loaded accessibility description.
    pub content_description: Option<String>,
    /// Loaded thumbnail.
    pub thumbnail: Option<ThumbnailData>,
}

impl Task {
    /// Task without any loaded visuals.
    #[must_use]
    pub fn new(key: TaskKey) -> Self {
        Self {
            key,
            description: TaskDescription::default(),
            icon: None,
            title: None,
            content_description: None,
            thumbnail: None,
        }
    }

    /// Attach the task's own description.
    #[must_use]
    pub fn with_description(mut self, description: TaskDescription) -> Self {
        self.description = description;
        self
    }

    /// Numeric id of the task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.key.id
    }

    /// Copy icon, title and content description from a cache entry.
    pub fn apply_icon_entry(&mut self, entry: TaskCacheEntry) {
        self.icon = Some(entry.icon);
        self.title = Some(entry.title);
        self.content_description = Some(entry.content_description);
    }

    /// Drop every loaded visual field to release memory.
    pub fn clear_visuals(&mut self) {
        self.icon = None;
        self.title = None;
        self.content_description = None;
        self.thumbnail = None;
    }
}

/// Group of tasks reported together by the recent-task source.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskGroup {
    /// A single fullscreen task.
    Single(Task),
    /// Two tasks shown side by side.
    Split {
        /// Left or top task.
        primary: Task,
        /// Right or bottom task.
        secondary: Task,
    },
    /// Freeform tasks grouped on a desk.
    Desktop {
        /// Desk hosting the tasks.
        desk_id: DeskId,
        /// Tasks on the desk, front to back.
        tasks: Vec<Task>,
    },
}

impl TaskGroup {
    /// Tasks of the group in presentation order.
    #[must_use]
    pub fn tasks(&self) -> Vec<&Task> {
        match self {
            Self::Single(task) => vec![task],
            Self::Split { primary, secondary } => vec![primary, secondary],
            Self::Desktop { tasks, .. } => tasks.iter().collect(),
        }
    }

    /// Consume the group into its tasks.
    #[must_use]
    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            Self::Single(task) => vec![task],
            Self::Split { primary, secondary } => vec![primary, secondary],
            Self::Desktop { tasks, .. } => tasks,
        }
    }
}
