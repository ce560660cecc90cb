//! Recents core for the quickstep launcher shell.
//!
//! Task icon and thumbnail caches, the high-resolution loading state, the
//! per-task visuals fan-out, the observable task repository, input consumer
//! selection and the overview command queue.

pub mod cancellable;
pub mod config;
pub mod high_res;
pub mod icon_cache;
pub mod input;
pub mod lru_cache;
pub mod overview;
pub mod service;
pub mod tasks_repository;
pub mod thumbnail_cache;
pub mod visuals;

// Re-exports for convenience
pub use cancellable::CancellableTask;
pub use config::{CacheConfig, OverviewConfig, QuickstepConfig, ThumbnailConfig};
pub use high_res::{HighResCallbackId, HighResLoadingState, HighResLoadingStateNotifier, HighResTransition};
pub use icon_cache::TaskIconCache;
pub use input::{
    ConsumerContext, ConsumerFlags, ConsumerSelection, InputConsumer, MotionEvent, new_consumer,
    select_consumer,
};
pub use lru_cache::CacheStats;
pub use overview::{CommandInfo, CommandStatus, CommandType, OverviewCommandHelper, OverviewEnvironment};
pub use service::{PlatformServices, RecentsServices};
pub use tasks_repository::{TaskListObserver, TaskListState, TaskObserver, TasksRepository, ThumbnailObserver};
pub use thumbnail_cache::TaskThumbnailCache;
pub use visuals::{
    TaskIconChangedCallback, TaskThumbnailChangedCallback, TaskVisualsChangeListener, TaskVisualsChangeNotifier,
    TaskVisualsChangedDelegate,
};
