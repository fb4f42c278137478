//! Write-once broadcast signals shared between the inhibitor tasks.
//!
//! A [`Signal`] starts unfired and can be fired exactly once. Any number of
//! clones may wait on it; every waiter, including one that starts waiting after
//! the signal fired, observes it.
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// A named, write-once, multi-consumer signal.
///
/// Cloning a `Signal` produces another handle to the same signal, so it can be
/// handed to every task that needs to fire or observe it.
#[derive(Clone)]
pub struct Signal {
    name: &'static str,
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Signal {
    /// Create a new unfired signal.
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = watch::channel(false);
        Signal {
            name,
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// The name given at construction, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fire the signal.
    ///
    /// Returns `true` if this call fired it and `false` if it had already been
    /// fired. Firing twice has no further effect.
    pub fn fire(&self) -> bool {
        let fired = self.sender.send_if_modified(|value| !std::mem::replace(value, true));
        if !fired {
            return false;
        }
        info!(signal = self.name, "Signal fired");
        true
    }

    /// Whether the signal has been fired.
    pub fn is_fired(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until the signal is fired. Returns immediately if it already was.
    pub async fn fired(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            // The sender lives as long as `self`, so this only errors if the
            // channel is torn down, in which case the signal can never fire.
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("fired", &self.is_fired())
            .finish()
    }
}
