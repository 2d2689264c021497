//! Defines all public event types broadcast by the lab engine.
//!
//! Listeners subscribe to these strongly-typed streams to observe a session
//! without being part of its control flow: the shell prints them, the
//! autopilot answers waits with them, and tests assert on their order.

use crate::common::{ListenerId, Side, TaskId, TaskKind};
use std::path::PathBuf;
use tokio::time::Instant;

/// Which side of the run phase a lifecycle event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Emitted after `setup()` returns and before `run()` starts.
    PreRun,
    /// Emitted after `run()` returns and before `teardown()` starts.
    PostRun,
}

/// A `PRE_RUN` or `POST_RUN` event of one task.
///
/// The `(kind, stage)` pair is the event identity: a trial's `PRE_RUN` and a
/// block's `PRE_RUN` are different events. The payload names the emitting task.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: TaskKind,
    pub stage: Stage,
    pub task: TaskId,
    pub label: String,
    pub timestamp: Instant,
}

impl LifecycleEvent {
    pub fn is(&self, kind: TaskKind, stage: Stage) -> bool {
        self.kind == kind && self.stage == stage
    }
}

/// Events related to the engine itself and to its suspension points.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the dispatcher loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired once when the dispatcher loop exits.
    EngineShutdown,
    /// Fired when a new watcher is added to the engine.
    ListenerAdded { id: ListenerId },
    /// Fired when a watcher is removed from the engine.
    ListenerRemoved { id: ListenerId },
    /// A workflow is now suspended until `key` is pressed.
    AwaitingKey { key: char },
    /// A workflow is now suspended until the target signal fires.
    AwaitingSignal,
}

/// Milestones of a recording session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session's output root was created.
    OutputCreated { root: PathBuf },
    /// A block's output directory is ready.
    BlockReady { index: usize, dir: PathBuf },
    /// A trial picked the effector that will trace its path.
    TracerSelected { trial: String, side: Side },
    /// A trial's rows were written to disk.
    TrialSaved { path: PathBuf, rows: usize },
    /// The session tree was copied to the archive.
    Archived { destination: PathBuf },
    /// The archive already held a session of this name; nothing was copied.
    AlreadyArchived { destination: PathBuf },
}
