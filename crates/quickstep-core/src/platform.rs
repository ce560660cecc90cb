use thiserror::Error;

use crate::id::{TaskId, UserId};
use crate::{Bitmap, TaskGroup, TaskKey, ThumbnailData};

/// Errors surfaced by platform service calls.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The remote service could not be reached.
    #[error("Platform service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The task is no longer known to the platform.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Other unclassified error.
    #[error("Other platform error: {0}")]
    Other(String),
}

/// Activity metadata resolved through the package manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityInfo {
    /// User-visible activity label.
    pub label: String,
    /// Activity icon, if the package declares one.
    pub icon: Option<Bitmap>,
}

/// Authoritative source of the recent task list.
///
/// Calls may block; callers dispatch them on a blocking pool.
pub trait RecentTasksSource: Send + Sync {
    /// Fetch the current recent task groups, most recent first.
    ///
    /// # Errors
    /// Returns a platform error when the task service cannot be queried.
    fn get_tasks(&self) -> Result<Vec<TaskGroup>, PlatformError>;
}

/// Package and activity resolution used by the icon cache.
pub trait ActivityInfoSource: Send + Sync {
    /// Resolve activity info for the task's component and user.
    ///
    /// # Errors
    /// Returns a platform error when the package manager is unreachable.
    fn activity_info(&self, key: &TaskKey) -> Result<Option<ActivityInfo>, PlatformError>;

    /// Default icon for `user`, badged when appropriate by the caller.
    fn default_icon(&self, user: UserId) -> Bitmap;

    /// Label decorated with the user profile badge.
    fn badged_label(&self, label: &str, user: UserId) -> String {
        if user.is_badged() {
            format!("Work {label}")
        } else {
            label.to_owned()
        }
    }
}

/// Snapshot storage and capture used by the thumbnail cache.
pub trait ThumbnailSource: Send + Sync {
    /// Read the stored snapshot for a task at the requested tier.
    ///
    /// # Errors
    /// Returns a platform error when the snapshot service is unreachable.
    fn task_thumbnail(
        &self,
        task_id: TaskId,
        reduced_resolution: bool,
    ) -> Result<Option<ThumbnailData>, PlatformError>;

    /// Capture a fresh snapshot of a live task.
    ///
    /// # Errors
    /// Returns a platform error when capture fails.
    fn take_task_snapshot(&self, task_id: TaskId) -> Result<Option<ThumbnailData>, PlatformError>;
}
