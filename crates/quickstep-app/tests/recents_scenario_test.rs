//! End-to-end recents scenarios over the in-memory platform.
//!
//! A task list is refreshed, part of it is marked visible, and the list then
//! changes underneath the repository.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use quickstep_app::{PlatformServices, QuickstepConfig, RecentsServices, TaskListState};
use quickstep_core::TaskGroup;
use quickstep_core::id::TaskId;
use quickstep_core::platform::RecentTasksSource;
use quickstep_platform::InMemoryPlatform;
use tokio::runtime::Handle;

fn services(config: &QuickstepConfig, platform: &Arc<InMemoryPlatform>) -> RecentsServices {
    RecentsServices::new(config, PlatformServices::from_backend(platform.clone()), Handle::current())
}

fn has_visuals(state: &TaskListState, task_id: TaskId) -> bool {
    state
        .get(task_id)
        .is_some_and(|task| task.icon.is_some() && task.title.is_some() && task.thumbnail.is_some())
}

async fn wait_for(services: &RecentsServices, predicate: impl FnMut(&TaskListState) -> bool) -> Arc<TaskListState> {
    let mut observer = services.repository().get_all_task_data(false);
    tokio::time::timeout(Duration::from_secs(5), observer.wait_until(predicate))
        .await
        .expect("state reached in time")
        .expect("repository alive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_task_is_released_and_survivors_keep_visuals() {
    let platform = Arc::new(InMemoryPlatform::synthetic(3));
    let services = services(&QuickstepConfig::default(), &platform);
    let repository = services.repository();

    repository.refresh().await.unwrap();
    assert_eq!(
        repository.current_tasks().ids().collect::<Vec<_>>(),
        vec![TaskId(1), TaskId(2), TaskId(3)]
    );

    repository.set_visible_tasks([TaskId(1), TaskId(2)]);
    let state = wait_for(&services, |state| has_visuals(state, TaskId(1)) && has_visuals(state, TaskId(2))).await;
    assert!(!has_visuals(&state, TaskId(3)));
    assert!(state.get(TaskId(3)).unwrap().icon.is_none());

    let remaining: Vec<TaskGroup> = platform
        .get_tasks()
        .unwrap()
        .into_iter()
        .filter(|group| group.tasks().iter().all(|task| task.id() != TaskId(1)))
        .collect();
    platform.set_tasks(remaining);
    repository.refresh().await.unwrap();

    assert!(!repository.current_tasks().contains(TaskId(1)));
    assert_eq!(repository.requested_task_ids(), vec![TaskId(2)]);
    assert!(!services.visuals().has_callbacks_for(TaskId(1)));

    let state = wait_for(&services, |state| has_visuals(state, TaskId(2))).await;
    assert_eq!(state.len(), 2);
    assert!(!has_visuals(&state, TaskId(3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_in_flight_for_removed_task_never_reaches_the_cache() {
    let platform = Arc::new(InMemoryPlatform::synthetic(2));
    let services = services(&QuickstepConfig::default(), &platform);
    let repository = services.repository();
    repository.refresh().await.unwrap();
    let removed_key = repository.current_tasks().get(TaskId(1)).unwrap().key.clone();

    platform.block_thumbnails(TaskId(1));
    repository.set_visible_tasks([TaskId(1), TaskId(2)]);
    wait_for(&services, |state| has_visuals(state, TaskId(2))).await;

    let remaining: Vec<TaskGroup> = platform
        .get_tasks()
        .unwrap()
        .into_iter()
        .filter(|group| group.tasks().iter().all(|task| task.id() != TaskId(1)))
        .collect();
    platform.set_tasks(remaining);
    repository.refresh().await.unwrap();

    platform.release_thumbnails(TaskId(1));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(services.thumbnail_cache().cached(&removed_key).is_none());
    assert!(!services.visuals().has_callbacks_for(TaskId(1)));
    assert!(!repository.is_task_requested(TaskId(1)));
    assert!(!repository.current_tasks().contains(TaskId(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hiding_every_task_drops_all_subscriptions() {
    let platform = Arc::new(InMemoryPlatform::synthetic(4));
    let services = services(&QuickstepConfig::default(), &platform);
    let repository = services.repository();

    repository.refresh().await.unwrap();
    repository.set_visible_tasks([TaskId(3), TaskId(4)]);
    wait_for(&services, |state| has_visuals(state, TaskId(3)) && has_visuals(state, TaskId(4))).await;
    assert!(services.visuals().is_subscribed());

    repository.set_visible_tasks(Vec::<TaskId>::new());

    assert!(repository.requested_task_ids().is_empty());
    assert!(!services.visuals().is_subscribed());
    let state = repository.current_tasks();
    assert!(state.tasks().iter().all(|task| task.icon.is_none() && task.thumbnail.is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forced_high_res_loads_full_resolution_thumbnails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[thumbnails]\nforce_high_res = true\n").unwrap();
    let config = QuickstepConfig::load(Some(&path)).unwrap();

    let platform = Arc::new(InMemoryPlatform::synthetic(2));
    let services = services(&config, &platform);
    let repository = services.repository();

    repository.refresh().await.unwrap();
    repository.set_visible_tasks([TaskId(2)]);
    wait_for(&services, |state| has_visuals(state, TaskId(2))).await;

    let thumbnail = repository.get_current_thumbnail_by_id(TaskId(2)).unwrap();
    assert!(!thumbnail.reduced_resolution);
    assert!(services.thumbnail_cache().is_high_res_enabled());
}
