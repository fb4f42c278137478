use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing::{debug, info};

use crate::inhibit::{Inhibitor, LockKind, ShutdownEvents};
use crate::signal::Signal;

/// Holds the primary delay lock on shutdown and turns the host's announcement
/// into the `shutdown` signal.
///
/// The lock stays held after the announcement until `unlock` (or the root
/// cancellation) fires, so anything reacting to `shutdown` still runs under
/// the lock.
pub struct ShutdownSignalSource<I> {
    inhibitor: Arc<I>,
    shutdown: Signal,
    unlock: Signal,
    cancel: Signal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Starting,
    Holding,
    Shutting,
    Releasing,
    Stopped,
}

impl<I: Inhibitor> ShutdownSignalSource<I> {
    /// Create the task. It fires `shutdown` and observes `unlock` and `cancel`.
    pub fn new(inhibitor: Arc<I>, shutdown: Signal, unlock: Signal, cancel: Signal) -> Self {
        ShutdownSignalSource {
            inhibitor,
            shutdown,
            unlock,
            cancel,
        }
    }

    /// Run until the lock is released.
    ///
    /// Failing to take the lock or to follow the host's announcements is
    /// fatal: without them the node cannot be protected.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut state = State::Starting;
        debug!(?state, "Shutdown signal source starting");

        let mut lock = self
            .inhibitor
            .acquire(LockKind::Shutdown)
            .await
            .context("unable to acquire the shutdown delay lock")?;
        let mut events = self
            .inhibitor
            .subscribe_shutdown()
            .await
            .context("unable to subscribe to shutdown announcements")?;
        state = transition(state, State::Holding);

        tokio::select! {
            biased;
            _ = self.cancel.fired() => {
                info!("Stopped before any shutdown was announced");
            }
            announced = wait_for_shutdown(&mut events) => {
                announced?;
                info!("Host announced shutdown");
                self.shutdown.fire();
                state = transition(state, State::Shutting);

                tokio::select! {
                    _ = self.unlock.fired() => {}
                    _ = self.cancel.fired() => {}
                }
            }
        }

        state = transition(state, State::Releasing);
        lock.release();
        transition(state, State::Stopped);
        Ok(())
    }
}

fn transition(from: State, to: State) -> State {
    debug!(?from, ?to, "Shutdown signal source state changed");
    to
}

/// Wait for the first "prepare for shutdown" event that is `true`.
async fn wait_for_shutdown(events: &mut ShutdownEvents) -> anyhow::Result<()> {
    while let Some(event) = events.next().await {
        match event.context("shutdown announcement stream failed")? {
            true => return Ok(()),
            false => debug!("Host reported shutdown is no longer pending"),
        }
    }
    anyhow::bail!("shutdown announcement stream ended")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inhibit::Error;
    use crate::test_utils::{Event, FakeInhibitor, Journal};
    use std::time::Duration;

    fn signals() -> (Signal, Signal, Signal) {
        (
            Signal::new("shutdown"),
            Signal::new("unlock-inhibitors"),
            Signal::new("cancel"),
        )
    }

    #[tokio::test]
    async fn test_fires_shutdown_and_holds_lock_until_unlock() {
        let journal = Journal::default();
        let (inhibitor, host) = FakeInhibitor::new(journal.clone());
        let (shutdown, unlock, cancel) = signals();
        let task = tokio::spawn(
            ShutdownSignalSource::new(Arc::new(inhibitor), shutdown.clone(), unlock.clone(), cancel)
                .run(),
        );

        host.send(Ok(false)).unwrap();
        host.send(Ok(true)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.fired())
            .await
            .expect("shutdown was not signalled");
        assert_eq!(journal.count(|e| matches!(e, Event::Released(_))), 0);

        unlock.fire();
        task.await.unwrap().unwrap();
        assert_eq!(
            journal.events(),
            vec![
                Event::Acquired(LockKind::Shutdown),
                Event::Released(LockKind::Shutdown)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_announcement_releases_without_signal() {
        let journal = Journal::default();
        let (inhibitor, _host) = FakeInhibitor::new(journal.clone());
        let (shutdown, unlock, cancel) = signals();
        cancel.fire();

        ShutdownSignalSource::new(Arc::new(inhibitor), shutdown.clone(), unlock, cancel)
            .run()
            .await
            .unwrap();

        assert!(!shutdown.is_fired());
        assert_eq!(journal.count(|e| matches!(e, Event::Released(_))), 1);
    }

    #[tokio::test]
    async fn test_refused_lock_is_fatal() {
        let journal = Journal::default();
        let (inhibitor, _host) = FakeInhibitor::new(journal.clone());
        let inhibitor = inhibitor.refusing(LockKind::Shutdown);
        let (shutdown, unlock, cancel) = signals();

        let result = ShutdownSignalSource::new(Arc::new(inhibitor), shutdown, unlock, cancel)
            .run()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscription_error_is_fatal_and_releases() {
        let journal = Journal::default();
        let (inhibitor, host) = FakeInhibitor::new(journal.clone());
        let (shutdown, unlock, cancel) = signals();
        host.send(Err(Error::Subscription("bus closed".to_string())))
            .unwrap();

        let result =
            ShutdownSignalSource::new(Arc::new(inhibitor), shutdown.clone(), unlock, cancel)
                .run()
                .await;

        assert!(result.is_err());
        assert!(!shutdown.is_fired());
        assert_eq!(journal.count(|e| matches!(e, Event::Released(_))), 1);
    }
}
