//! An edge-triggered rendezvous used for external "something happened" signals.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable signal that one side sends and another side waits on.
///
/// Only sends made after a wait has started wake it. Sends with nobody
/// listening are dropped, so a touch left over from an earlier phase never
/// starts a trial.
#[derive(Debug, Clone)]
pub struct Signal {
    generation: Arc<watch::Sender<u64>>,
}

/// A wait that has already taken its snapshot of the signal.
#[derive(Debug)]
pub struct SignalListener {
    receiver: watch::Receiver<u64>,
}

impl Default for Signal {
    fn default() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            generation: Arc::new(sender),
        }
    }
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal, waking every listener registered before this call.
    pub fn send(&self) {
        self.generation.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Starts listening. Sends before this call are not seen by the listener.
    pub fn listen(&self) -> SignalListener {
        SignalListener {
            receiver: self.generation.subscribe(),
        }
    }

    /// Suspends until the signal fires after this call.
    pub async fn wait(&self) {
        self.listen().wait().await;
    }
}

impl SignalListener {
    pub async fn wait(mut self) {
        // the sender lives as long as the signal, so this only errs on teardown
        let _ = self.receiver.changed().await;
    }
}
