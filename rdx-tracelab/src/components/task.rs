//! Defines the setup → run → teardown contract shared by every task.
//!
//! A concrete task (trial, block, experiment) implements [`Task`]; the
//! lifecycle itself is driven by the one generic [`workflow`] function:
//!
//! 1. `setup()`
//! 2. emit `PRE_RUN` (per-task hooks, then the engine bus, then arm periodic timers)
//! 3. `run()`
//! 4. emit `POST_RUN` (disarm periodic timers, then per-task hooks, then the bus)
//! 5. `teardown()`
//!
//! Each phase may suspend internally on timed, key, or signal waits; no such
//! wait happens between the steps.

use crate::common::{ListenerId, TaskId, TaskKind, TaskState, TimerId};
use crate::components::watcher::Callback;
use crate::engine::LabEngine;
use crate::error::{Result, TracelabError};
use crate::events::{LifecycleEvent, Stage};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A listener attached to one task's lifecycle events.
pub type LifecycleHook = Box<dyn FnMut(&LifecycleEvent) + Send + Sync>;

struct PendingPeriodic {
    id: TimerId,
    period: Duration,
    callback: Callback,
}

/// Per-instance lifecycle state: current phase, periodic timers, and hooks.
pub struct Lifecycle {
    task_id: Option<TaskId>,
    state: TaskState,
    last_timer: u32,
    pending: Vec<PendingPeriodic>,
    armed: Vec<(TimerId, ListenerId)>,
    pre_run_hooks: Vec<LifecycleHook>,
    post_run_hooks: Vec<LifecycleHook>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            task_id: None,
            state: TaskState::Created,
            last_timer: 0,
            pending: Vec::new(),
            armed: Vec::new(),
            pre_run_hooks: Vec::new(),
            post_run_hooks: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The id assigned when the workflow started.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Calls `callback` every `period` between this task's `PRE_RUN` and
    /// `POST_RUN` events.
    ///
    /// Each registration gets its own timer id from a counter local to this task.
    pub fn add_periodic(
        &mut self,
        period: Duration,
        callback: impl FnMut() + Send + Sync + 'static,
    ) -> TimerId {
        self.last_timer += 1;
        let id = TimerId(self.last_timer);
        self.pending.push(PendingPeriodic {
            id,
            period,
            callback: Box::new(callback),
        });
        id
    }

    /// Timer ids registered on this task, in registration order.
    pub fn timers(&self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self
            .pending
            .iter()
            .map(|p| p.id)
            .chain(self.armed.iter().map(|(id, _)| *id))
            .collect();
        ids.sort();
        ids
    }

    /// Timers currently firing.
    pub fn armed_timers(&self) -> Vec<TimerId> {
        self.armed.iter().map(|(id, _)| *id).collect()
    }

    /// Runs `hook` when this task emits `PRE_RUN`.
    pub fn on_pre_run(&mut self, hook: impl FnMut(&LifecycleEvent) + Send + Sync + 'static) {
        self.pre_run_hooks.push(Box::new(hook));
    }

    /// Runs `hook` when this task emits `POST_RUN`.
    pub fn on_post_run(&mut self, hook: impl FnMut(&LifecycleEvent) + Send + Sync + 'static) {
        self.post_run_hooks.push(Box::new(hook));
    }

    fn advance(&mut self, kind: TaskKind, label: &str, to: TaskState) -> Result<()> {
        if self.state.successor() != Some(to) {
            return Err(TracelabError::InvalidTransition {
                kind,
                label: label.to_string(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    async fn arm(&mut self, engine: &LabEngine) {
        for periodic in self.pending.drain(..) {
            let listener = engine.add_periodic(periodic.period, periodic.callback).await;
            self.armed.push((periodic.id, listener));
        }
    }

    async fn disarm(&mut self, engine: &LabEngine) {
        for (timer, listener) in self.armed.drain(..) {
            engine.remove_periodic(listener).await;
            debug!("Timer {:?} disarmed.", timer);
        }
    }
}

/// The contract of a runnable task.
///
/// `setup()` and `teardown()` do nothing unless overridden. The provided
/// `run()` fails with [`TracelabError::Unimplemented`], so every concrete task
/// supplies its own.
#[async_trait]
pub trait Task: Send {
    /// The level of this task; selects its lifecycle event pair.
    fn kind(&self) -> TaskKind {
        TaskKind::Task
    }

    /// A human-readable name used in events and logs.
    fn label(&self) -> String;

    fn lifecycle(&mut self) -> &mut Lifecycle;

    async fn setup(&mut self, _engine: &LabEngine) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, _engine: &LabEngine) -> Result<()> {
        Err(TracelabError::Unimplemented {
            kind: self.kind(),
            label: self.label(),
        })
    }

    async fn teardown(&mut self, _engine: &LabEngine) -> Result<()> {
        Ok(())
    }

    /// Called instead of the remaining phases when one of them fails.
    /// Releases whatever setup acquired; teardown does not run on that path.
    async fn abort(&mut self, _engine: &LabEngine) {}
}

/// Drives one task through its full lifecycle.
///
/// A workflow runs at most once per task instance; starting it again fails
/// with an invalid transition. If any phase fails, the task's periodic timers
/// are disarmed, [`Task::abort`] runs, and the error is returned without
/// emitting further events.
pub async fn workflow<T: Task + ?Sized>(task: &mut T, engine: &LabEngine) -> Result<()> {
    let kind = task.kind();
    let label = task.label();
    if task.lifecycle().state() != TaskState::Created {
        return Err(TracelabError::InvalidTransition {
            kind,
            label,
            from: task.lifecycle().state(),
            to: TaskState::Setup,
        });
    }

    let id = engine.register_task(kind, &label).await;
    task.lifecycle().task_id = Some(id);
    let started = Instant::now();

    let outcome = drive(task, engine, id, kind, &label).await;
    if outcome.is_err() {
        task.lifecycle().disarm(engine).await;
        task.abort(engine).await;
    }
    engine.unregister_task(id).await;

    match &outcome {
        Ok(()) => info!("{} '{}' done in {:.3}s", kind, label, started.elapsed().as_secs_f64()),
        Err(err) => info!("{} '{}' aborted: {}", kind, label, err),
    }
    outcome
}

async fn drive<T: Task + ?Sized>(
    task: &mut T,
    engine: &LabEngine,
    id: TaskId,
    kind: TaskKind,
    label: &str,
) -> Result<()> {
    enter(task, engine, id, kind, label, TaskState::Setup).await?;
    task.setup(engine).await?;

    enter(task, engine, id, kind, label, TaskState::Running).await?;
    emit(task.lifecycle(), engine, id, kind, label, Stage::PreRun);
    task.lifecycle().arm(engine).await;
    task.run(engine).await?;
    task.lifecycle().disarm(engine).await;
    emit(task.lifecycle(), engine, id, kind, label, Stage::PostRun);

    enter(task, engine, id, kind, label, TaskState::Teardown).await?;
    task.teardown(engine).await?;

    enter(task, engine, id, kind, label, TaskState::Done).await
}

async fn enter<T: Task + ?Sized>(
    task: &mut T,
    engine: &LabEngine,
    id: TaskId,
    kind: TaskKind,
    label: &str,
    state: TaskState,
) -> Result<()> {
    task.lifecycle().advance(kind, label, state)?;
    engine.update_task(id, state).await;
    debug!("{} '{}' -> {:?}", kind, label, state);
    Ok(())
}

fn emit(
    lifecycle: &mut Lifecycle,
    engine: &LabEngine,
    id: TaskId,
    kind: TaskKind,
    label: &str,
    stage: Stage,
) {
    let event = LifecycleEvent {
        kind,
        stage,
        task: id,
        label: label.to_string(),
        timestamp: Instant::now(),
    };
    let hooks = match stage {
        Stage::PreRun => &mut lifecycle.pre_run_hooks,
        Stage::PostRun => &mut lifecycle.post_run_hooks,
    };
    for hook in hooks.iter_mut() {
        hook(&event);
    }
    engine.emit_lifecycle(event);
}

/// Runs each task produced by `tasks` to completion, strictly one after another.
///
/// The next task is only produced after the previous workflow, teardown
/// included, has returned. Returns how many workflows ran.
pub async fn run_sequence<T, I>(tasks: I, engine: &LabEngine) -> Result<usize>
where
    T: Task,
    I: Iterator<Item = Result<T>> + Send,
{
    let mut completed = 0;
    for task in tasks {
        let mut task = task?;
        workflow(&mut task, engine).await?;
        completed += 1;
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockResolution;
    use std::sync::{Arc, Mutex};

    struct Bare {
        lifecycle: Lifecycle,
    }

    #[async_trait]
    impl Task for Bare {
        fn label(&self) -> String {
            "bare".into()
        }

        fn lifecycle(&mut self) -> &mut Lifecycle {
            &mut self.lifecycle
        }
    }

    struct Sleeper {
        lifecycle: Lifecycle,
        log: Arc<Mutex<Vec<String>>>,
        duration: Duration,
    }

    #[async_trait]
    impl Task for Sleeper {
        fn label(&self) -> String {
            "sleeper".into()
        }

        fn lifecycle(&mut self) -> &mut Lifecycle {
            &mut self.lifecycle
        }

        async fn setup(&mut self, engine: &LabEngine) -> Result<()> {
            self.log.lock().unwrap().push("setup".into());
            engine.wait(Duration::from_millis(300)).await;
            Ok(())
        }

        async fn run(&mut self, engine: &LabEngine) -> Result<()> {
            engine.wait(self.duration).await;
            Ok(())
        }

        async fn teardown(&mut self, engine: &LabEngine) -> Result<()> {
            engine.wait(Duration::from_millis(300)).await;
            self.log.lock().unwrap().push("teardown".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn bare_task_run_is_unimplemented() {
        let engine = LabEngine::new(ClockResolution::Low);
        let mut task = Bare {
            lifecycle: Lifecycle::new(),
        };
        let err = workflow(&mut task, &engine).await.unwrap_err();
        assert!(matches!(err, TracelabError::Unimplemented { kind: TaskKind::Task, .. }));
        assert_eq!(task.lifecycle.state(), TaskState::Running);
        assert!(engine.active_tasks().await.is_empty());
    }

    struct Failing {
        lifecycle: Lifecycle,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Task for Failing {
        fn label(&self) -> String {
            "failing".into()
        }

        fn lifecycle(&mut self) -> &mut Lifecycle {
            &mut self.lifecycle
        }

        async fn run(&mut self, _engine: &LabEngine) -> Result<()> {
            Err(TracelabError::EmptyPath("failing".into()))
        }

        async fn teardown(&mut self, _engine: &LabEngine) -> Result<()> {
            self.log.lock().unwrap().push("teardown".into());
            Ok(())
        }

        async fn abort(&mut self, _engine: &LabEngine) {
            self.log.lock().unwrap().push("abort".into());
        }
    }

    #[tokio::test]
    async fn failed_phase_aborts_instead_of_tearing_down() {
        let engine = LabEngine::new(ClockResolution::Low);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut task = Failing {
            lifecycle: Lifecycle::new(),
            log: log.clone(),
        };
        assert!(workflow(&mut task, &engine).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["abort".to_string()]);

        // a refused restart never reaches the task
        assert!(workflow(&mut task, &engine).await.is_err());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn timer_ids_increase_per_instance() {
        let mut a = Lifecycle::new();
        let mut b = Lifecycle::new();
        assert!(a.timers().is_empty());
        assert_eq!(a.add_periodic(Duration::from_secs(1), || {}), TimerId(1));
        assert_eq!(a.add_periodic(Duration::from_secs(1), || {}), TimerId(2));
        assert_eq!(b.add_periodic(Duration::from_secs(1), || {}), TimerId(1));
        assert_eq!(a.timers(), vec![TimerId(1), TimerId(2)]);
        assert!(a.armed_timers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_callbacks_only_fire_during_run() {
        let engine = LabEngine::new(ClockResolution::High);
        let dispatcher = engine.start();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut task = Sleeper {
            lifecycle: Lifecycle::new(),
            log: log.clone(),
            duration: Duration::from_secs(1),
        };
        for name in ["tick-a", "tick-b"] {
            let log = log.clone();
            task.lifecycle.add_periodic(Duration::from_millis(100), move || {
                log.lock().unwrap().push(name.to_string());
            });
        }
        let pre = log.clone();
        task.lifecycle.on_pre_run(move |_| pre.lock().unwrap().push("pre".into()));
        let post = log.clone();
        task.lifecycle.on_post_run(move |_| post.lock().unwrap().push("post".into()));

        workflow(&mut task, &engine).await.unwrap();
        engine.wait(Duration::from_secs(1)).await;

        let log = log.lock().unwrap().clone();
        let pre_at = log.iter().position(|e| e == "pre").unwrap();
        let post_at = log.iter().position(|e| e == "post").unwrap();
        assert_eq!(log.first().map(String::as_str), Some("setup"));
        assert_eq!(log.last().map(String::as_str), Some("teardown"));
        assert_eq!(post_at, log.len() - 2);
        for (i, entry) in log.iter().enumerate() {
            if entry.starts_with("tick") {
                assert!(i > pre_at && i < post_at, "{entry} fired outside the run phase");
            }
        }
        assert!(log.iter().filter(|e| *e == "tick-a").count() >= 5);
        assert!(log.iter().filter(|e| *e == "tick-b").count() >= 5);
        assert_eq!(engine.periodic_count().await, 0);

        engine.shutdown();
        dispatcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_are_emitted_once_in_order() {
        let engine = LabEngine::new(ClockResolution::Low);
        let mut rx = engine.subscribe_lifecycle_events();
        let mut task = Sleeper {
            lifecycle: Lifecycle::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            duration: Duration::from_millis(10),
        };
        workflow(&mut task, &engine).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.is(TaskKind::Task, Stage::PreRun));
        assert!(second.is(TaskKind::Task, Stage::PostRun));
        assert_eq!(first.task, second.task);
        assert!(first.timestamp <= second.timestamp);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finished_workflow_cannot_restart() {
        let engine = LabEngine::new(ClockResolution::Low);
        let mut task = Sleeper {
            lifecycle: Lifecycle::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            duration: Duration::ZERO,
        };
        workflow(&mut task, &engine).await.unwrap();
        assert_eq!(task.lifecycle.state(), TaskState::Done);
        let err = workflow(&mut task, &engine).await.unwrap_err();
        assert!(matches!(err, TracelabError::InvalidTransition { from: TaskState::Done, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_runs_children_one_at_a_time() {
        let engine = LabEngine::new(ClockResolution::Low);
        let log = Arc::new(Mutex::new(Vec::new()));
        let children = (0..3).map(|_| {
            Ok(Sleeper {
                lifecycle: Lifecycle::new(),
                log: log.clone(),
                duration: Duration::from_millis(50),
            })
        });
        let ran = run_sequence(children, &engine).await.unwrap();
        assert_eq!(ran, 3);
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["setup", "teardown", "setup", "teardown", "setup", "teardown"]
        );
    }
}
