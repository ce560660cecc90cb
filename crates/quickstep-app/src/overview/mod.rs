//! Overview command queue and the collaborators it drives.

pub mod command;
pub mod environment;
pub mod helper;

pub use command::{CommandInfo, CommandStatus, CommandType};
pub use environment::{
    OverviewEnvironment, OverviewSurface, RecentsAnimationListener, RecentsPage, TaskAnimationManager, TaskTile,
    TaskbarQuickSwitch,
};
pub use helper::OverviewCommandHelper;
