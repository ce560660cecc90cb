//! `simulate`: drive the recents core over the in-memory platform.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use quickstep_app::lru_cache::CacheStats;
use quickstep_app::{PlatformServices, QuickstepConfig, RecentsServices, TaskListState, TasksRepository};
use quickstep_core::id::TaskId;
use quickstep_core::{Task, ThumbnailData};
use quickstep_platform::{CallCounts, InMemoryPlatform};
use serde::Serialize;
use tokio::runtime::{Handle, Runtime};
use tracing::info;

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Simulation knobs from the command line.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub tasks: usize,
    pub visible: usize,
    pub latency: Duration,
    pub high_res: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub high_res_enabled: bool,
    pub tasks: Vec<TaskReport>,
    pub icon_cache: CacheStats,
    pub thumbnail_cache: CacheStats,
    pub thumbnail_cache_capacity: usize,
    pub platform_calls: PlatformCalls,
}

#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub package: String,
    pub user_id: i32,
    pub requested: bool,
    pub title: Option<String>,
    pub content_description: Option<String>,
    pub has_icon: bool,
    pub thumbnail: Option<ThumbnailReport>,
}

#[derive(Debug, Serialize)]
pub struct ThumbnailReport {
    pub snapshot_id: u64,
    pub reduced_resolution: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct PlatformCalls {
    pub task_list_fetches: usize,
    pub activity_lookups: usize,
    pub thumbnail_reads: usize,
    pub snapshot_captures: usize,
}

impl From<CallCounts> for PlatformCalls {
    fn from(counts: CallCounts) -> Self {
        Self {
            task_list_fetches: counts.task_list_fetches,
            activity_lookups: counts.activity_lookups,
            thumbnail_reads: counts.thumbnail_reads,
            snapshot_captures: counts.snapshot_captures,
        }
    }
}

/// Run a simulation on a fresh multi-threaded runtime.
pub fn run(config: &QuickstepConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(simulate(config, options))
}

async fn simulate(config: &QuickstepConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    let platform = Arc::new(InMemoryPlatform::synthetic(options.tasks).with_latency(options.latency));
    let services = RecentsServices::new(
        config,
        PlatformServices::from_backend(platform.clone()),
        Handle::current(),
    );
    let repository = services.repository();

    repository.refresh().await.context("failed to load recent tasks")?;
    let visible: Vec<TaskId> = repository.current_tasks().ids().take(options.visible).collect();

    let thumbnails = services.thumbnail_cache();
    thumbnails.set_desired_cache_size(visible.len().max(config.cache.thumbnail_capacity));
    thumbnails.update_cache_size_and_remove_excess();

    repository.set_visible_tasks(visible.iter().copied());
    wait_for_visuals(repository, &visible, false).await?;
    info!(visible = visible.len(), "Visible tasks loaded");

    if options.high_res {
        thumbnails.set_visible(true);
        wait_for_visuals(repository, &visible, true).await?;
        info!("Visible tasks upgraded to full resolution");
    }

    let state = repository.current_tasks();
    Ok(SimulationReport {
        high_res_enabled: thumbnails.is_high_res_enabled(),
        tasks: state
            .tasks()
            .iter()
            .map(|task| task_report(task, repository.is_task_requested(task.id())))
            .collect(),
        icon_cache: services.icon_cache().stats(),
        thumbnail_cache: thumbnails.stats(),
        thumbnail_cache_capacity: thumbnails.capacity(),
        platform_calls: platform.call_counts().into(),
    })
}

async fn wait_for_visuals(repository: &TasksRepository, visible: &[TaskId], full_resolution: bool) -> Result<()> {
    let loaded = |state: &TaskListState| {
        visible.iter().all(|task_id| {
            state.get(*task_id).is_some_and(|task| {
                task.icon.is_some()
                    && task
                        .thumbnail
                        .as_ref()
                        .is_some_and(|thumbnail| thumbnail.satisfies(!full_resolution))
            })
        })
    };
    let mut observer = repository.get_all_task_data(false);
    tokio::time::timeout(LOAD_TIMEOUT, observer.wait_until(loaded))
        .await
        .context("timed out waiting for task visuals")?
        .context("task repository shut down")?;
    Ok(())
}

fn task_report(task: &Task, requested: bool) -> TaskReport {
    TaskReport {
        id: task.id(),
        package: task.key.package().to_owned(),
        user_id: task.key.user_id.0,
        requested,
        title: task.title.clone(),
        content_description: task.content_description.clone(),
        has_icon: task.icon.is_some(),
        thumbnail: task.thumbnail.as_ref().map(thumbnail_report),
    }
}

fn thumbnail_report(thumbnail: &ThumbnailData) -> ThumbnailReport {
    let (width, height) = thumbnail
        .bitmap
        .as_ref()
        .map_or((0, 0), |bitmap| (bitmap.width, bitmap.height));
    ThumbnailReport {
        snapshot_id: thumbnail.snapshot_id.0,
        reduced_resolution: thumbnail.reduced_resolution,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    fn options(high_res: bool) -> SimulateOptions {
        SimulateOptions {
            tasks: 5,
            visible: 2,
            latency: Duration::ZERO,
            high_res,
        }
    }

    #[test]
    fn simulation_loads_only_visible_tasks() {
        let report = run(&QuickstepConfig::default(), &options(false)).unwrap();

        assert_eq!(report.tasks.len(), 5);
        assert!(!report.high_res_enabled);
        let loaded: Vec<TaskId> = report
            .tasks
            .iter()
            .filter(|task| task.has_icon)
            .map(|task| task.id)
            .collect();
        assert_eq!(loaded, vec![TaskId(1), TaskId(2)]);
        assert!(report.tasks[0].thumbnail.as_ref().unwrap().reduced_resolution);
        assert_eq!(report.tasks[0].title.as_deref(), Some("App 1"));
        assert!(report.tasks[4].thumbnail.is_none());
        assert_eq!(report.platform_calls.task_list_fetches, 1);
    }

    #[test]
    fn high_res_upgrades_visible_thumbnails() {
        let report = run(&QuickstepConfig::default(), &options(true)).unwrap();

        assert!(report.high_res_enabled);
        for task in report.tasks.iter().filter(|task| task.requested) {
            let thumbnail = task.thumbnail.as_ref().unwrap();
            assert!(!thumbnail.reduced_resolution);
            assert_eq!((thumbnail.width, thumbnail.height), (8, 8));
        }
    }

    #[test]
    fn report_serializes_to_json() {
        let report = run(&QuickstepConfig::default(), &options(false)).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["tasks"][0]["id"], 1);
        assert_eq!(value["tasks"][0]["requested"], true);
        assert!(value["icon_cache"]["writes"].as_u64().unwrap() >= 2);
    }
}
