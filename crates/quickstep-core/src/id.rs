use serde::{Deserialize, Serialize};
use std::{fmt, num::ParseIntError, str::FromStr};

/// Identifier of a platform task.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Identifier of a user profile owning a task.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
    /// The primary (system) user.
    pub const SYSTEM: Self = Self(0);

    /// Whether icons and labels for this user carry a profile badge.
    #[must_use]
    pub const fn is_badged(self) -> bool {
        self.0 != Self::SYSTEM.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a logical display.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub i32);

impl DisplayId {
    /// The built-in display.
    pub const DEFAULT: Self = Self(0);
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DisplayId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Identifier of a desktop-windowing desk.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeskId(pub i32);

impl fmt::Display for DeskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Version tag of a captured task snapshot.
///
/// Snapshot ids grow monotonically per capture, so two thumbnails with the
/// same id carry the same pixels.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_parses_with_whitespace() {
        let id: TaskId = " 42 ".parse().unwrap_or_else(|err| panic!("must parse: {err}"));
        assert_eq!(id, TaskId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn only_non_system_users_are_badged() {
        assert!(!UserId::SYSTEM.is_badged());
        assert!(UserId(10).is_badged());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&DisplayId(2)).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(json, "2");
    }
}
