//! # Tracelab
//!
//! The run-phase core of a path-tracing motor-control experiment.
//!
//! A session is a three-level hierarchy, **Experiment → Block → Trial**, where
//! every level follows the same setup → run → teardown lifecycle. The lifecycle
//! is driven by one generic function, [`components::task::workflow`], over the
//! [`components::task::Task`] contract; each level only supplies its phases.
//!
//! ## Core Concepts
//!
//! - **LabEngine**: owns the clock, the suspension primitives (timed, key and
//!   signal waits), the event bus, and the watchers that run periodic
//!   callbacks and proximity checks while a workflow is suspended.
//! - **Lifecycle events**: each level emits its own `PRE_RUN` / `POST_RUN`
//!   pair. Periodic callbacks registered on a task fire only between the two.
//! - **Collaborators**: the renderer and the motion-capture rig are reached
//!   through the [`rig::Scene`] and [`rig::MotionCapture`] traits; [`sim`]
//!   provides in-process versions for headless runs and tests.
//! - **Output**: each trial writes one CSV under its block's directory; the
//!   finished session tree is copied to an archive exactly once.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tracelab::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TracelabConfig::load(None)?;
//!     let engine = LabEngine::new(config.clock.resolution.clone());
//!     let dispatcher = engine.start();
//!
//!     let scene = Arc::new(SimScene::new());
//!     let rig = Arc::new(SimRig::new(config.rig.motion.profile()).with_scene(scene.clone()));
//!     let autopilot = Autopilot::spawn(&engine, rig.clone(), Side::Right);
//!
//!     let mut experiment = Experiment::new(config, scene, rig)?;
//!     workflow(&mut experiment, &engine).await?;
//!
//!     autopilot.stop();
//!     engine.shutdown();
//!     dispatcher.await?;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Tracelab Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod block;
pub mod catalog;
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod experiment;
pub mod paths;
pub mod recording;
pub mod rig;
pub mod session;
pub mod signal;
pub mod sim;
pub mod trial;

/// A prelude module for easy importing of the most common Tracelab types.
pub mod prelude {
    pub use crate::block::Block;
    pub use crate::common::{ListenerId, MarkerId, Side, TaskId, TaskKind, TaskState, Vec3};
    pub use crate::components::task::{run_sequence, workflow, Lifecycle, Task};
    pub use crate::config::{BlockConfig, ClockResolution, TracelabConfig};
    pub use crate::engine::LabEngine;
    pub use crate::error::{Result, TracelabError};
    pub use crate::events::{LifecycleEvent, SessionEvent, Stage, SystemEvent};
    pub use crate::experiment::Experiment;
    pub use crate::rig::{MotionCapture, Scene};
    pub use crate::signal::Signal;
    pub use crate::sim::{Autopilot, SimRig, SimScene};
    pub use crate::trial::Trial;
}
