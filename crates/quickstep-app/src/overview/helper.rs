//! Serialized execution of overview commands.
//!
//! Commands run one at a time in FIFO order. Each runs under a deadline; a
//! command whose completion is deferred (launch or recents animation) holds
//! the queue until its completion signal, `on_command_finished`, or the
//! deadline.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quickstep_core::id::{DisplayId, TaskId};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::command::{CommandInfo, CommandStatus, CommandType};
use super::environment::{OverviewEnvironment, OverviewSurface, RecentsAnimationListener};
use crate::config::OverviewConfig;

/// Result of executing a command.
enum Execution {
    /// Done; advance the queue.
    Finished,
    /// Completion arrives through the receiver.
    Deferred(oneshot::Receiver<()>),
}

#[derive(Default)]
struct CommandQueue {
    pending: VecDeque<Arc<CommandInfo>>,
    generation: u64,
    processor: Option<JoinHandle<()>>,
}

struct HelperInner {
    environment: Arc<dyn OverviewEnvironment>,
    runtime: Handle,
    command_timeout: Duration,
    max_pending_commands: usize,
    queue: Mutex<CommandQueue>,
    next_id: AtomicU64,
}

/// Queue of overview commands coming from buttons, keyboard and system UI.
#[derive(Clone)]
pub struct OverviewCommandHelper {
    inner: Arc<HelperInner>,
}

impl OverviewCommandHelper {
    /// Create a helper; commands are processed on `runtime`.
    pub fn new(environment: Arc<dyn OverviewEnvironment>, runtime: Handle, config: &OverviewConfig) -> Self {
        Self {
            inner: Arc::new(HelperInner {
                environment,
                runtime,
                command_timeout: config.command_timeout(),
                max_pending_commands: config.max_pending_commands,
                queue: Mutex::new(CommandQueue::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue a command for one display.
    ///
    /// Returns `None` when the queue is full; the command is dropped.
    pub fn add_command(&self, command_type: CommandType, display_id: DisplayId) -> Option<Arc<CommandInfo>> {
        self.inner.enqueue(command_type, display_id, true)
    }

    /// Queue one command per display in `display_ids`. Only the last created
    /// command is marked last of batch; it is returned.
    pub fn add_commands_for_displays(
        &self,
        command_type: CommandType,
        display_ids: &[DisplayId],
    ) -> Option<Arc<CommandInfo>> {
        let mut last = None;
        for (idx, display_id) in display_ids.iter().enumerate() {
            let is_last = idx + 1 == display_ids.len();
            if let Some(command) = self.inner.enqueue(command_type, *display_id, is_last) {
                last = Some(command);
            }
        }
        last
    }

    /// Queue one command per connected display.
    pub fn add_commands_for_all_displays(&self, command_type: CommandType) -> Option<Arc<CommandInfo>> {
        let display_ids = self.inner.environment.display_ids();
        self.add_commands_for_displays(command_type, &display_ids)
    }

    /// Queue one command per connected display except `excluded`.
    pub fn add_commands_for_displays_except(
        &self,
        command_type: CommandType,
        excluded: DisplayId,
    ) -> Option<Arc<CommandInfo>> {
        let display_ids: Vec<DisplayId> = self
            .inner
            .environment
            .display_ids()
            .into_iter()
            .filter(|display_id| *display_id != excluded)
            .collect();
        self.add_commands_for_displays(command_type, &display_ids)
    }

    /// Mark `command` completed if it is at the head of the queue.
    ///
    /// Returns `false` and changes nothing otherwise.
    pub fn on_command_finished(&self, command: &Arc<CommandInfo>) -> bool {
        self.inner.finish_head(command, CommandStatus::Completed)
    }

    /// Whether going home now would not race a queued command.
    pub fn can_start_home_safely(&self) -> bool {
        self.inner
            .queue()
            .pending
            .front()
            .is_none_or(|head| head.command_type() == CommandType::Home)
    }

    /// Cancel every queued command and stop processing.
    pub fn clear_pending_commands(&self) {
        let (drained, processor) = {
            let mut queue = self.inner.queue();
            queue.generation += 1;
            let drained: Vec<Arc<CommandInfo>> = queue.pending.drain(..).collect();
            (drained, queue.processor.take())
        };
        if let Some(processor) = processor {
            processor.abort();
        }
        debug!(count = drained.len(), "Cleared pending overview commands");
        for command in drained {
            if !command.status().is_terminal() {
                command.set_status(CommandStatus::Canceled);
            }
        }
    }

    /// Snapshot of the queue, head first.
    pub fn queued_commands(&self) -> Vec<Arc<CommandInfo>> {
        self.inner.queue().pending.iter().cloned().collect()
    }

    /// Human-readable queue state.
    pub fn dump(&self) -> String {
        let queue = self.inner.queue();
        let mut out = format!(
            "OverviewCommandHelper: pending={} processing={}\n",
            queue.pending.len(),
            queue.processor.is_some()
        );
        for command in &queue.pending {
            let _ = writeln!(out, "  {command}");
        }
        out
    }
}

impl HelperInner {
    fn queue(&self) -> MutexGuard<'_, CommandQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(
        self: &Arc<Self>,
        command_type: CommandType,
        display_id: DisplayId,
        is_last_of_batch: bool,
    ) -> Option<Arc<CommandInfo>> {
        let mut queue = self.queue();
        if queue.pending.len() >= self.max_pending_commands {
            debug!(
                %command_type,
                display_id = %display_id,
                pending = queue.pending.len(),
                "Overview command queue full, dropping command"
            );
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Arc::new(CommandInfo::new(id, command_type, display_id, is_last_of_batch));
        queue.pending.push_back(Arc::clone(&command));
        if queue.processor.is_none() {
            let generation = queue.generation;
            queue.processor = Some(self.runtime.spawn(process_queue(Arc::clone(self), generation)));
        }
        Some(command)
    }

    /// Head of the queue for the processor of `generation`. Clears the
    /// processor slot when there is nothing left to do.
    fn next_head(&self, generation: u64) -> Option<Arc<CommandInfo>> {
        let mut queue = self.queue();
        if queue.generation != generation {
            return None;
        }
        let head = queue.pending.front().cloned();
        if head.is_none() {
            queue.processor = None;
        }
        head
    }

    fn finish_head(&self, command: &Arc<CommandInfo>, status: CommandStatus) -> bool {
        let mut queue = self.queue();
        let is_head = queue
            .pending
            .front()
            .is_some_and(|head| Arc::ptr_eq(head, command));
        if !is_head {
            return false;
        }
        command.set_status(status);
        queue.pending.pop_front();
        true
    }

    async fn run(&self, command: &Arc<CommandInfo>) {
        let Execution::Deferred(done) = self.execute(command) else {
            return;
        };
        let mut status = command.subscribe_status();
        tokio::select! {
            _ = done => {}
            _ = status.wait_for(|status| status.is_terminal()) => {}
        }
    }

    fn execute(&self, command: &Arc<CommandInfo>) -> Execution {
        let overview = self.environment.overview(command.display_id());
        match overview {
            Some(surface) if surface.is_visible() => execute_when_visible(command, surface.as_ref()),
            surface => self.execute_when_hidden(command, surface.as_deref()),
        }
    }

    fn execute_when_hidden(&self, command: &Arc<CommandInfo>, surface: Option<&dyn OverviewSurface>) -> Execution {
        let display_id = command.display_id();
        match command.command_type() {
            CommandType::Hide => {
                if let Some(taskbar) = self.environment.taskbar(display_id)
                    && let Some(index) = taskbar.launch_focused_task()
                    && let Some(surface) = surface
                {
                    surface.set_keyboard_task_focus_index(Some(index));
                }
                return Execution::Finished;
            }
            CommandType::KeyboardInput => {
                if let Some(taskbar) = self.environment.taskbar(display_id)
                    && taskbar.allows_quick_switch()
                {
                    taskbar.open_quick_switch_view();
                    return Execution::Finished;
                }
                if let Some(surface) = surface {
                    surface.set_keyboard_task_focus_index(Some(0));
                }
            }
            CommandType::Home => {
                self.environment.start_home_activity(display_id);
                return Execution::Finished;
            }
            CommandType::Show => {
                if let Some(surface) = surface {
                    surface.set_keyboard_task_focus_index(None);
                }
            }
            CommandType::Toggle => {}
        }

        if let Some(surface) = surface
            && let Some(switched) = surface.switch_to_recents_if_visible()
        {
            return Execution::Deferred(switched);
        }

        let Some(manager) = self.environment.task_animation_manager(display_id) else {
            error!(display_id = %display_id, command = %command.command_type(), "No task animation manager for display");
            return Execution::Finished;
        };

        let (listener, done) = CommandCompletion::new(command.id());
        command.bind_animation(Arc::clone(&manager));
        if manager.is_recents_animation_running() {
            manager.continue_recents_animation(listener);
        } else {
            manager.start_recents_animation(display_id, listener);
        }
        Execution::Deferred(done)
    }
}

fn execute_when_visible(command: &CommandInfo, surface: &dyn OverviewSurface) -> Execution {
    match command.command_type() {
        CommandType::Show => Execution::Finished,
        CommandType::Hide | CommandType::KeyboardInput => {
            if surface.is_handling_touch() {
                return Execution::Finished;
            }
            surface.set_keyboard_task_focus_index(None);
            launch_task(surface, surface.page().current_task())
        }
        CommandType::Toggle => launch_task(surface, surface.page().next_toggled_task()),
        CommandType::Home => {
            surface.start_home();
            Execution::Finished
        }
    }
}

fn launch_task(surface: &dyn OverviewSurface, task_id: Option<TaskId>) -> Execution {
    let Some(task_id) = task_id else {
        return Execution::Finished;
    };
    match surface.launch_task(task_id) {
        Some(launched) => Execution::Deferred(launched),
        None => {
            debug!(task_id = %task_id, "Task launch did not start, going home");
            surface.start_home();
            Execution::Finished
        }
    }
}

async fn process_queue(inner: Arc<HelperInner>, generation: u64) {
    while let Some(command) = inner.next_head(generation) {
        command.set_status(CommandStatus::Processing);
        debug!(command = %command, "Executing overview command");
        if tokio::time::timeout(inner.command_timeout, inner.run(&command))
            .await
            .is_ok()
        {
            inner.finish_head(&command, CommandStatus::Completed);
            continue;
        }

        warn!(
            command = %command,
            timeout_ms = inner.command_timeout.as_millis(),
            "Overview command timed out"
        );
        if let Some(manager) = command.take_animation() {
            manager.cancel_recents_animation();
        }
        inner.finish_head(&command, CommandStatus::Canceled);
    }
}

/// Resolves a deferred command once the recents animation starts or is
/// canceled.
struct CommandCompletion {
    command_id: u64,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandCompletion {
    fn new(command_id: u64) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        let completion = Arc::new(Self {
            command_id,
            done: Mutex::new(Some(sender)),
        });
        (completion, receiver)
    }

    fn finish(&self) {
        let sender = self.done.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

impl RecentsAnimationListener for CommandCompletion {
    fn on_recents_animation_start(&self) {
        debug!(command_id = self.command_id, "Recents animation started");
        self.finish();
    }

    fn on_recents_animation_canceled(&self) {
        debug!(command_id = self.command_id, "Recents animation canceled");
        self.finish();
    }
}
