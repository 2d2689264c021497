//! The engine that schedules a session's single cooperative workflow.
//!
//! `LabEngine` owns everything a task needs from its host runtime: the
//! monotonic clock, the three suspension primitives (timed wait, key wait,
//! signal wait), the event bus, and the watchers that run periodic callbacks
//! and proximity checks between suspension points.

use crate::common::{ListenerId, TaskId, TaskKind, TaskState};
use crate::components::watcher::{Callback, ConditionCheck, ConditionalWatcher, PeriodicWatcher};
use crate::config::ClockResolution;
use crate::error::{Result, TracelabError};
use crate::events::{LifecycleEvent, SessionEvent, SystemEvent};
use crate::signal::Signal;
use slotmap::SlotMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// A running workflow as seen from outside the task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub label: String,
    pub state: TaskState,
    pub started: Instant,
}

/// The main lab engine.
///
/// This struct is cloned into every task and listener; all clones share the
/// same channels and watcher tables.
#[derive(Clone)]
pub struct LabEngine {
    resolution: ClockResolution,
    epoch: Instant,
    lifecycle_sender: broadcast::Sender<LifecycleEvent>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    session_event_sender: broadcast::Sender<SessionEvent>,
    shutdown_sender: broadcast::Sender<()>,
    key_sender: mpsc::UnboundedSender<char>,
    key_receiver: Arc<Mutex<mpsc::UnboundedReceiver<char>>>,
    periodic_watchers: Arc<RwLock<SlotMap<ListenerId, PeriodicWatcher>>>,
    conditional_watchers: Arc<RwLock<SlotMap<ListenerId, ConditionalWatcher>>>,
    tasks: Arc<RwLock<SlotMap<TaskId, TaskRecord>>>,
}

// Core implementation block for internal logic.
impl LabEngine {
    /// Creates a new `LabEngine` ticking at the given resolution.
    pub fn new(resolution: ClockResolution) -> Self {
        const CHANNEL_CAPACITY: usize = 256;
        let (lifecycle_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (system_event_sender, _) = broadcast::channel(64);
        let (session_event_sender, _) = broadcast::channel(64);
        let (shutdown_sender, _) = broadcast::channel(1);
        let (key_sender, key_receiver) = mpsc::unbounded_channel();

        Self {
            resolution,
            epoch: Instant::now(),
            lifecycle_sender,
            system_event_sender,
            session_event_sender,
            shutdown_sender,
            key_sender,
            key_receiver: Arc::new(Mutex::new(key_receiver)),
            periodic_watchers: Arc::new(RwLock::new(SlotMap::with_key())),
            conditional_watchers: Arc::new(RwLock::new(SlotMap::with_key())),
            tasks: Arc::new(RwLock::new(SlotMap::with_key())),
        }
    }

    /// Spawns the dispatcher loop that evaluates watchers on every tick.
    ///
    /// The loop runs until `shutdown()` is called.
    pub fn start(&self) -> JoinHandle<()> {
        info!("LabEngine starting at {:?}", self.resolution);
        let dispatcher = self.clone();
        let shutdown_rx = self.shutdown_sender.subscribe();
        tokio::spawn(async move { dispatcher.dispatcher_loop(shutdown_rx).await })
    }

    /// Stops the dispatcher loop.
    pub fn shutdown(&self) {
        if self.shutdown_sender.send(()).is_err() {
            debug!("Shutdown requested but the dispatcher is not running.");
        }
    }

    #[doc(hidden)]
    async fn dispatcher_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.resolution.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count: u64 = 0;
        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: Instant::now(),
            })
            .ok();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                now = ticker.tick() => {
                    tick_count += 1;
                    trace!("Tick #{} received.", tick_count);
                    self.process_conditional_watchers().await;
                    self.process_periodic_watchers(now).await;
                }
            }
        }
        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("LabEngine has shut down after {} ticks.", tick_count);
    }

    #[doc(hidden)]
    async fn process_periodic_watchers(&self, now: Instant) {
        // The write lock is held while callbacks run, so a watcher removed by
        // `remove_periodic` can never fire afterwards.
        let mut watchers = self.periodic_watchers.write().await;
        for (id, watcher) in watchers.iter_mut() {
            if watcher.process_tick(now) {
                trace!("Periodic watcher {:?} fired.", id);
            }
        }
    }

    #[doc(hidden)]
    async fn process_conditional_watchers(&self) {
        let mut watchers = self.conditional_watchers.write().await;
        for (id, watcher) in watchers.iter_mut() {
            if let Some(transition) = watcher.check_and_fire() {
                debug!("Conditional watcher {:?}: {:?}", id, transition);
            }
        }
    }
}

// Clock and suspension primitives.
impl LabEngine {
    /// The monotonic clock shared by every task of the session.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time since the engine was created.
    pub fn uptime(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Suspends the calling workflow for a fixed duration.
    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Delivers a key press to the workflow.
    pub fn press_key(&self, key: char) {
        if self.key_sender.send(key).is_err() {
            debug!("Key {:?} pressed after the input channel closed.", key);
        }
    }

    /// Suspends the calling workflow until `key` is pressed.
    ///
    /// Presses are queued, so a press made before the wait begins satisfies it.
    /// Other keys pressed meanwhile are discarded. There is no timeout.
    pub async fn wait_for_key(&self, key: char) -> Result<()> {
        let mut receiver = self.key_receiver.lock().await;
        self.system_event_sender
            .send(SystemEvent::AwaitingKey { key })
            .ok();
        debug!("Waiting for key {:?}.", key);
        loop {
            match receiver.recv().await {
                Some(pressed) if pressed == key => return Ok(()),
                Some(other) => debug!("Ignoring key {:?} while waiting for {:?}.", other, key),
                None => return Err(TracelabError::InputClosed),
            }
        }
    }

    /// Suspends the calling workflow until `signal` fires. Only sends made
    /// after the wait begins count.
    pub async fn wait_for_signal(&self, signal: &Signal) {
        let listener = signal.listen();
        self.system_event_sender
            .send(SystemEvent::AwaitingSignal)
            .ok();
        debug!("Waiting for the target signal.");
        listener.wait().await;
    }
}

// Watcher registration.
impl LabEngine {
    /// Registers a callback executed every `period` from now on.
    ///
    /// Firing is quantised to the engine's tick resolution. Callbacks run on
    /// the dispatcher and must not call back into the engine's watcher API.
    ///
    /// # Returns
    /// A `ListenerId` which can be used to later remove this watcher.
    pub async fn on_interval(
        &self,
        period: Duration,
        callback: impl FnMut() + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_periodic(period, Box::new(callback)).await
    }

    pub(crate) async fn add_periodic(&self, period: Duration, callback: Callback) -> ListenerId {
        let watcher = PeriodicWatcher::new(period, Instant::now(), callback);
        let id = self.periodic_watchers.write().await.insert(watcher);
        self.system_event_sender
            .send(SystemEvent::ListenerAdded { id })
            .ok();
        id
    }

    /// Removes a periodic watcher. Once this returns the callback will not run again.
    ///
    /// Returns `true` if the watcher was found and removed.
    pub async fn remove_periodic(&self, id: ListenerId) -> bool {
        let was_removed = self.periodic_watchers.write().await.remove(id).is_some();
        if was_removed {
            self.system_event_sender
                .send(SystemEvent::ListenerRemoved { id })
                .ok();
        }
        was_removed
    }

    /// Registers logic executed whenever `condition` becomes true, and
    /// optionally whenever it becomes false again.
    ///
    /// # Returns
    /// A `ListenerId` which can be used to later remove this watcher.
    pub async fn on_conditional(
        &self,
        condition: impl Fn() -> bool + Send + Sync + 'static,
        on_enter: impl FnMut() + Send + Sync + 'static,
        on_exit: Option<Callback>,
    ) -> ListenerId {
        let condition: ConditionCheck = Box::new(condition);
        let watcher = ConditionalWatcher::new(condition, Box::new(on_enter), on_exit);
        let id = self.conditional_watchers.write().await.insert(watcher);
        self.system_event_sender
            .send(SystemEvent::ListenerAdded { id })
            .ok();
        id
    }

    /// Removes a conditional watcher.
    ///
    /// Returns `true` if the watcher was found and removed.
    pub async fn remove_conditional(&self, id: ListenerId) -> bool {
        let was_removed = self.conditional_watchers.write().await.remove(id).is_some();
        if was_removed {
            self.system_event_sender
                .send(SystemEvent::ListenerRemoved { id })
                .ok();
        }
        was_removed
    }

    /// Number of periodic watchers currently armed.
    pub async fn periodic_count(&self) -> usize {
        self.periodic_watchers.read().await.len()
    }

    /// Number of conditional watchers currently registered.
    pub async fn conditional_count(&self) -> usize {
        self.conditional_watchers.read().await.len()
    }
}

// Task registry.
impl LabEngine {
    pub(crate) async fn register_task(&self, kind: TaskKind, label: &str) -> TaskId {
        let started = Instant::now();
        self.tasks.write().await.insert_with_key(|id| TaskRecord {
            id,
            kind,
            label: label.to_string(),
            state: TaskState::Created,
            started,
        })
    }

    pub(crate) async fn update_task(&self, id: TaskId, state: TaskState) {
        if let Some(record) = self.tasks.write().await.get_mut(id) {
            record.state = state;
        }
    }

    pub(crate) async fn unregister_task(&self, id: TaskId) {
        self.tasks.write().await.remove(id);
    }

    /// Workflows currently in progress, outermost first.
    pub async fn active_tasks(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.started);
        records
    }
}

// Event bus.
impl LabEngine {
    pub(crate) fn emit_lifecycle(&self, event: LifecycleEvent) {
        self.lifecycle_sender.send(event).ok();
    }

    /// Broadcasts a session milestone to all subscribers.
    pub fn emit_session(&self, event: SessionEvent) {
        self.session_event_sender.send(event).ok();
    }

    /// Subscribes to every task's `PRE_RUN` and `POST_RUN` events.
    pub fn subscribe_lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_sender.subscribe()
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the `SessionEvent` stream.
    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_event_sender.subscribe()
    }
}
