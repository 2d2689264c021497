//! Defines watchers the engine's dispatcher evaluates on every tick.

use std::time::Duration;
use tokio::time::Instant;

/// A function closure that represents a condition to be checked.
pub type ConditionCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// A function closure executed when a watcher fires.
pub type Callback = Box<dyn FnMut() + Send + Sync>;

/// Executes a callback every `period` while it is registered.
#[doc(hidden)]
pub(crate) struct PeriodicWatcher {
    pub period: Duration,
    pub last_fired: Instant,
    pub callback: Callback,
}

impl PeriodicWatcher {
    /// Creates a watcher whose first firing is one `period` after `armed_at`.
    pub(crate) fn new(period: Duration, armed_at: Instant, callback: Callback) -> Self {
        Self {
            period,
            last_fired: armed_at,
            callback,
        }
    }

    /// Executes the callback if a full period has elapsed since the last firing.
    /// Returns `true` if the callback ran.
    pub(crate) fn process_tick(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_fired) >= self.period {
            (self.callback)();
            self.last_fired = now;
            return true;
        }
        false
    }
}

/// Which way a conditional watcher's condition just flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered,
    Exited,
}

/// Watches a condition and reacts when it becomes true or false.
///
/// Unlike a level trigger, the enter logic runs once per false → true edge, so
/// an effector resting inside the target sphere does not refire it.
#[doc(hidden)]
pub(crate) struct ConditionalWatcher {
    pub condition: ConditionCheck,
    pub on_enter: Callback,
    pub on_exit: Option<Callback>,
    is_met: bool,
}

impl ConditionalWatcher {
    pub(crate) fn new(condition: ConditionCheck, on_enter: Callback, on_exit: Option<Callback>) -> Self {
        Self {
            condition,
            on_enter,
            on_exit,
            is_met: false,
        }
    }

    /// Evaluates the condition and runs the matching logic on an edge.
    pub(crate) fn check_and_fire(&mut self) -> Option<Transition> {
        let met = (self.condition)();
        match (self.is_met, met) {
            (false, true) => {
                self.is_met = true;
                (self.on_enter)();
                Some(Transition::Entered)
            }
            (true, false) => {
                self.is_met = false;
                if let Some(on_exit) = self.on_exit.as_mut() {
                    on_exit();
                }
                Some(Transition::Exited)
            }
            _ => None,
        }
    }
}
