//! The Inhibitor Client: everything needed to hold host power-management locks.
//!
//! The host interface is abstracted by the [`Inhibitor`] trait. The concrete
//! systemd-logind implementation lives in [`logind`].
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tracing::{info, warn};

pub mod logind;

/// Identity presented to the host for every lock this process takes.
pub const HOLDER: &str = "d8-shutdown-inhibitor";

/// The class of lock requested from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// `delay` lock on `shutdown`. This is the primary lock of the process.
    Shutdown,
    /// `block` lock on `shutdown`, keeping the host from timing out a delay
    /// lock during long drains.
    ShutdownBlock,
    /// `delay` lock on the power key so a button press does not shut the host
    /// down straight away.
    PowerKey,
}

/// How an inhibitor lock affects the inhibited action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Postpone the action for the host's grace period.
    Delay,
    /// Prevent the action while the lock is held.
    Block,
}

impl Mode {
    /// The mode as understood by the host.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Delay => "delay",
            Mode::Block => "block",
        }
    }
}

impl LockKind {
    /// The inhibited action (the host's `what`).
    pub fn what(&self) -> &'static str {
        match self {
            LockKind::Shutdown | LockKind::ShutdownBlock => "shutdown",
            LockKind::PowerKey => "handle-power-key",
        }
    }

    /// The lock mode.
    pub fn mode(&self) -> Mode {
        match self {
            LockKind::Shutdown | LockKind::PowerKey => Mode::Delay,
            LockKind::ShutdownBlock => Mode::Block,
        }
    }

    /// Human readable reason shown next to the lock by the host.
    pub fn why(&self) -> &'static str {
        match self {
            LockKind::Shutdown => "Waiting for labelled pods to leave the node",
            LockKind::ShutdownBlock => "Keeping shutdown blocked while pods are drained",
            LockKind::PowerKey => "Power key handled by the shutdown inhibitor",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.what(), self.mode().as_str())
    }
}

/// Errors returned by an [`Inhibitor`].
#[derive(Debug, Error)]
pub enum Error {
    /// The host interface could not be reached.
    #[error("host inhibitor interface is unavailable: {0}")]
    HostUnavailable(String),
    /// The host declined to grant the lock.
    #[error("host refused {kind} lock: {reason}")]
    LockRefused {
        /// The requested lock.
        kind: LockKind,
        /// The reason reported by the host.
        reason: String,
    },
    /// Subscribing to, or reading from, the shutdown broadcast failed.
    #[error("shutdown subscription failed: {0}")]
    Subscription(String),
}

/// A stream of "prepare for shutdown" events. `true` means the host is about to
/// shut down, `false` that a previously announced shutdown was cancelled.
///
/// The stream ends, possibly after yielding an error, when the subscription is
/// lost.
pub type ShutdownEvents = BoxStream<'static, Result<bool, Error>>;

/// The host side of an acquired lock.
pub trait LockHandle: Send {
    /// Hand the lock back to the host.
    fn release(self: Box<Self>) -> Result<(), Error>;
}

/// An inhibitor lock owned by exactly one task.
///
/// The lock is handed back to the host by [`InhibitLock::release`] or, at the
/// latest, when the value is dropped. Either way the host sees exactly one
/// release.
pub struct InhibitLock {
    kind: LockKind,
    handle: Option<Box<dyn LockHandle>>,
}

impl InhibitLock {
    /// Wrap a host handle.
    pub fn new(kind: LockKind, handle: Box<dyn LockHandle>) -> Self {
        InhibitLock {
            kind,
            handle: Some(handle),
        }
    }

    /// The class of this lock.
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Whether the lock is still held.
    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the lock. Calling this on an already released lock does nothing.
    ///
    /// Failures are logged and not retried; the host drops the lock anyway when
    /// the process exits.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.release() {
                Ok(()) => info!(lock = %self.kind, "Inhibitor lock released"),
                Err(e) => warn!(lock = %self.kind, error = %e, "Failed to release inhibitor lock"),
            }
        }
    }
}

impl Drop for InhibitLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for InhibitLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InhibitLock")
            .field("kind", &self.kind)
            .field("held", &self.is_held())
            .finish()
    }
}

/// The host power-management lock interface.
#[async_trait]
pub trait Inhibitor: Send + Sync {
    /// Acquire a lock of the given class.
    async fn acquire(&self, kind: LockKind) -> Result<InhibitLock, Error>;

    /// Subscribe to the host's "prepare for shutdown" broadcasts.
    async fn subscribe_shutdown(&self) -> Result<ShutdownEvents, Error>;
}
