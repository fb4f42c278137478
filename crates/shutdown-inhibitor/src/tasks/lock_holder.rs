use std::sync::Arc;

use tracing::{info, warn};

use crate::inhibit::{Inhibitor, LockKind};
use crate::signal::Signal;

/// Holds an auxiliary lock (power key, shutdown block) until `unlock` or the
/// root cancellation fires.
///
/// The lock only strengthens the primary one, so failing to take it is logged
/// and the task simply ends.
pub struct LockHolder<I> {
    kind: LockKind,
    inhibitor: Arc<I>,
    unlock: Signal,
    cancel: Signal,
}

impl<I: Inhibitor> LockHolder<I> {
    /// Create a task holding a lock of class `kind`.
    pub fn new(kind: LockKind, inhibitor: Arc<I>, unlock: Signal, cancel: Signal) -> Self {
        LockHolder {
            kind,
            inhibitor,
            unlock,
            cancel,
        }
    }

    /// Run until the lock is released. Never fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut lock = match self.inhibitor.acquire(self.kind).await {
            Ok(lock) => lock,
            Err(e) => {
                warn!(lock = %self.kind, error = %e, "Unable to acquire supplementary lock, continuing without it");
                return Ok(());
            }
        };

        tokio::select! {
            _ = self.unlock.fired() => info!(lock = %self.kind, "Inhibitors unlocked"),
            _ = self.cancel.fired() => info!(lock = %self.kind, "Stopping"),
        }
        lock.release();
        Ok(())
    }
}
