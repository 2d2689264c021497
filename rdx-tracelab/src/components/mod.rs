//! Contains the building blocks the engine schedules.
//!
//! `task` defines the setup/run/teardown contract and the generic workflow
//! driver; `watcher` defines the periodic and conditional watchers the engine
//! evaluates between a workflow's suspension points.

pub mod task;
pub mod watcher;
