//! Contains common, primitive types shared by every layer of a session.
//!
//! This module defines the ID types used to identify running tasks, engine
//! listeners, and scene visuals, plus the small value types (`Vec3`, `Side`,
//! `TaskKind`, `TaskState`) that flow between the run-phase core and its
//! collaborators.

use serde::Deserialize;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely identifies a running workflow in the engine's task registry.
    ///
    /// A `TaskId` is assigned when a task's workflow starts and is carried as
    /// the payload of its `PRE_RUN` and `POST_RUN` events.
    pub struct TaskId;

    /// Uniquely and safely identifies a watcher registered with the engine.
    pub struct ListenerId;

    /// Identifies a visual (path line, trace line, environment model) in a scene.
    pub struct VisualId;
}

/// A position in meters, in the scene's world frame.
pub type Vec3 = [f64; 3];

/// Squared Euclidean distance between two points.
pub fn distance_squared(a: Vec3, b: Vec3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Identifies a periodic timer registered on a single task.
///
/// Timer ids come from a counter local to each task instance, so they are only
/// meaningful together with the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

/// Identifies a motion-capture marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub u32);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which hand an effector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The level of a task in the Experiment → Block → Trial hierarchy.
///
/// Each kind has its own pair of lifecycle events, so listeners can tell a
/// trial's `PRE_RUN` apart from its block's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// A bare task with no concrete level.
    Task,
    Trial,
    Block,
    Experiment,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Task => "task",
            TaskKind::Trial => "trial",
            TaskKind::Block => "block",
            TaskKind::Experiment => "experiment",
        };
        f.write_str(name)
    }
}

/// The forward-only lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    Created,
    Setup,
    Running,
    Teardown,
    Done,
}

impl TaskState {
    /// The only state that may follow this one, if any.
    pub fn successor(self) -> Option<TaskState> {
        match self {
            TaskState::Created => Some(TaskState::Setup),
            TaskState::Setup => Some(TaskState::Running),
            TaskState::Running => Some(TaskState::Teardown),
            TaskState::Teardown => Some(TaskState::Done),
            TaskState::Done => None,
        }
    }
}
