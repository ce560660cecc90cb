//! Composition root wiring caches, the visuals delegate and the repository.

use std::sync::Arc;

use quickstep_core::id::UserId;
use quickstep_core::platform::{ActivityInfoSource, RecentTasksSource, ThumbnailSource};
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::{OverviewConfig, QuickstepConfig};
use crate::icon_cache::TaskIconCache;
use crate::overview::{OverviewCommandHelper, OverviewEnvironment};
use crate::tasks_repository::TasksRepository;
use crate::thumbnail_cache::TaskThumbnailCache;
use crate::visuals::{TaskVisualsChangeNotifier, TaskVisualsChangedDelegate};

/// Platform contracts the recents core consumes.
#[derive(Clone)]
pub struct PlatformServices {
    /// Recent task list.
    pub recent_tasks: Arc<dyn RecentTasksSource>,
    /// Package and activity resolution.
    pub activities: Arc<dyn ActivityInfoSource>,
    /// Snapshot storage and capture.
    pub thumbnails: Arc<dyn ThumbnailSource>,
}

impl PlatformServices {
    /// Serve every contract from one backend.
    pub fn from_backend<P>(backend: Arc<P>) -> Self
    where
        P: RecentTasksSource + ActivityInfoSource + ThumbnailSource + 'static,
    {
        Self {
            recent_tasks: backend.clone(),
            activities: backend.clone(),
            thumbnails: backend,
        }
    }
}

/// Every recents component, wired once per process.
pub struct RecentsServices {
    visuals_notifier: Arc<TaskVisualsChangeNotifier>,
    icon_cache: TaskIconCache,
    thumbnail_cache: TaskThumbnailCache,
    visuals: Arc<TaskVisualsChangedDelegate>,
    repository: TasksRepository,
    overview: OverviewConfig,
    runtime: Handle,
}

impl RecentsServices {
    /// Build the component graph. Background work runs on `runtime`.
    pub fn new(config: &QuickstepConfig, platform: PlatformServices, runtime: Handle) -> Self {
        let visuals_notifier = Arc::new(TaskVisualsChangeNotifier::new());

        let icon_cache = TaskIconCache::new(platform.activities, config.cache.icon_capacity);
        icon_cache.set_visuals_listener(visuals_notifier.clone());

        let thumbnail_cache = TaskThumbnailCache::new(
            platform.thumbnails,
            config.cache.thumbnail_capacity,
            config.thumbnails.force_high_res,
        );
        thumbnail_cache.set_visuals_listener(visuals_notifier.clone());

        let visuals = TaskVisualsChangedDelegate::new(visuals_notifier.clone(), Arc::new(thumbnail_cache.clone()));
        let repository = TasksRepository::new(
            platform.recent_tasks,
            icon_cache.clone(),
            thumbnail_cache.clone(),
            visuals.clone(),
            runtime.clone(),
        );

        debug!(
            icon_capacity = config.cache.icon_capacity,
            thumbnail_capacity = config.cache.thumbnail_capacity,
            force_high_res = config.thumbnails.force_high_res,
            "Recents services created"
        );

        Self {
            visuals_notifier,
            icon_cache,
            thumbnail_cache,
            visuals,
            repository,
            overview: config.overview.clone(),
            runtime,
        }
    }

    /// Task list repository.
    pub const fn repository(&self) -> &TasksRepository {
        &self.repository
    }

    /// Icon cache.
    pub const fn icon_cache(&self) -> &TaskIconCache {
        &self.icon_cache
    }

    /// Thumbnail cache.
    pub const fn thumbnail_cache(&self) -> &TaskThumbnailCache {
        &self.thumbnail_cache
    }

    /// Per-task visuals fan-out.
    pub const fn visuals(&self) -> &Arc<TaskVisualsChangedDelegate> {
        &self.visuals
    }

    /// Broadcast hub the caches publish into.
    pub const fn visuals_notifier(&self) -> &Arc<TaskVisualsChangeNotifier> {
        &self.visuals_notifier
    }

    /// Command queue driving `environment`, sharing this runtime.
    pub fn overview_command_helper(&self, environment: Arc<dyn OverviewEnvironment>) -> OverviewCommandHelper {
        OverviewCommandHelper::new(environment, self.runtime.clone(), &self.overview)
    }

    /// A package was updated or removed: drop its cached icons.
    pub async fn on_package_changed(&self, package: &str, user: UserId) -> usize {
        self.icon_cache.invalidate_cache_entries(package, user).await
    }

    /// Release every cached visual, e.g. under memory pressure.
    pub async fn trim_memory(&self) {
        self.icon_cache.clear_cache().await;
        self.thumbnail_cache.clear();
    }
}
