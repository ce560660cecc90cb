//! Queued overview commands and their lifecycle.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use quickstep_core::id::DisplayId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;

use super::environment::TaskAnimationManager;

/// What the user asked overview to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Show overview.
    Show,
    /// Leave overview into the focused task.
    Hide,
    /// Toggle between overview and the next task.
    Toggle,
    /// Go home.
    Home,
    /// Keyboard quick switch.
    KeyboardInput,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Toggle => "toggle",
            Self::Home => "home",
            Self::KeyboardInput => "keyboard_input",
        };
        f.write_str(name)
    }
}

/// Command lifecycle: `Idle` → `Processing` → `Completed` | `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Queued.
    Idle,
    /// Being executed.
    Processing,
    /// Finished normally.
    Completed,
    /// Dropped by timeout or queue clear.
    Canceled,
}

impl CommandStatus {
    /// Whether the command reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// One queued command for one display.
pub struct CommandInfo {
    id: u64,
    command_type: CommandType,
    display_id: DisplayId,
    created_at: OffsetDateTime,
    is_last_of_batch: bool,
    status: watch::Sender<CommandStatus>,
    animation: Mutex<Option<Arc<dyn TaskAnimationManager>>>,
}

impl CommandInfo {
    pub(crate) fn new(id: u64, command_type: CommandType, display_id: DisplayId, is_last_of_batch: bool) -> Self {
        let (status, _) = watch::channel(CommandStatus::Idle);
        Self {
            id,
            command_type,
            display_id,
            created_at: OffsetDateTime::now_utc(),
            is_last_of_batch,
            status,
            animation: Mutex::new(None),
        }
    }

    /// Sequence number, unique per helper.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Requested action.
    #[must_use]
    pub const fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// Target display.
    #[must_use]
    pub const fn display_id(&self) -> DisplayId {
        self.display_id
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Whether this is the last command of a multi-display batch.
    #[must_use]
    pub const fn is_last_of_batch(&self) -> bool {
        self.is_last_of_batch
    }

    /// Current status.
    pub fn status(&self) -> CommandStatus {
        *self.status.borrow()
    }

    /// Wait until the command completes or is canceled.
    pub async fn wait_for_terminal(&self) -> CommandStatus {
        let mut receiver = self.status.subscribe();
        receiver
            .wait_for(|status| status.is_terminal())
            .await
            .map_or(CommandStatus::Canceled, |status| *status)
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<CommandStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: CommandStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn bind_animation(&self, manager: Arc<dyn TaskAnimationManager>) {
        *self.animation.lock().unwrap_or_else(PoisonError::into_inner) = Some(manager);
    }

    pub(crate) fn take_animation(&self) -> Option<Arc<dyn TaskAnimationManager>> {
        self.animation.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInfo")
            .field("id", &self.id)
            .field("command_type", &self.command_type)
            .field("display_id", &self.display_id)
            .field("status", &self.status())
            .field("is_last_of_batch", &self.is_last_of_batch)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let created = self
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.created_at.unix_timestamp().to_string());
        write!(
            f,
            "#{} {} display={} status={:?} created={} last_of_batch={}",
            self.id,
            self.command_type,
            self.display_id,
            self.status(),
            created,
            self.is_last_of_batch
        )
    }
}
