//! [`Inhibitor`] backed by systemd-logind on the system D-Bus.
//!
//! Locks are file descriptors returned by `org.freedesktop.login1.Manager.Inhibit`;
//! closing the descriptor releases the lock. Shutdown announcements arrive as
//! the `PrepareForShutdown` signal.
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedFd;
use zbus::{dbus_proxy, Connection};

use super::{Error, InhibitLock, Inhibitor, LockHandle, LockKind, ShutdownEvents, HOLDER};

#[dbus_proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Manager {
    /// Take an inhibitor lock.
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;

    /// Emitted with `true` right before shutdown and with `false` if it is
    /// cancelled.
    #[dbus_proxy(signal)]
    fn prepare_for_shutdown(&self, start: bool) -> zbus::Result<()>;
}

/// A connection to systemd-logind.
#[derive(Clone)]
pub struct Logind {
    manager: ManagerProxy<'static>,
}

impl Logind {
    /// Connect to logind over the system bus.
    ///
    /// Fails with [`Error::HostUnavailable`] if the bus or logind cannot be
    /// reached.
    pub async fn connect() -> Result<Self, Error> {
        let connection = Connection::system()
            .await
            .map_err(|e| Error::HostUnavailable(e.to_string()))?;
        let manager = ManagerProxy::new(&connection)
            .await
            .map_err(|e| Error::HostUnavailable(e.to_string()))?;
        let logind = Logind { manager };
        logind.report_max_delay().await;
        Ok(logind)
    }

    /// Log the host's upper bound for delay locks. Past it, the host shuts
    /// down regardless of what we hold.
    async fn report_max_delay(&self) {
        match self
            .manager
            .inner()
            .get_property::<u64>("InhibitDelayMaxUSec")
            .await
        {
            Ok(usec) => info!(
                max_delay = ?Duration::from_micros(usec),
                "Connected to logind"
            ),
            Err(e) => warn!(error = %e, "Connected to logind, but unable to read InhibitDelayMaxUSec"),
        }
    }
}

struct FdHandle(OwnedFd);

impl LockHandle for FdHandle {
    fn release(self: Box<Self>) -> Result<(), Error> {
        // logind drops the lock once its last descriptor is closed.
        drop(self.0);
        Ok(())
    }
}

fn classify(kind: LockKind, error: zbus::Error) -> Error {
    match error {
        zbus::Error::MethodError(name, description, _) => Error::LockRefused {
            kind,
            reason: match description {
                Some(description) => format!("{}: {}", name.as_str(), description),
                None => name.to_string(),
            },
        },
        zbus::Error::FDO(e) => Error::LockRefused {
            kind,
            reason: e.to_string(),
        },
        other => Error::HostUnavailable(other.to_string()),
    }
}

#[async_trait]
impl Inhibitor for Logind {
    async fn acquire(&self, kind: LockKind) -> Result<InhibitLock, Error> {
        debug!(lock = %kind, "Requesting inhibitor lock");
        let fd = self
            .manager
            .inhibit(kind.what(), HOLDER, kind.why(), kind.mode().as_str())
            .await
            .map_err(|e| classify(kind, e))?;
        info!(lock = %kind, "Inhibitor lock acquired");
        Ok(InhibitLock::new(kind, Box::new(FdHandle(fd))))
    }

    async fn subscribe_shutdown(&self) -> Result<ShutdownEvents, Error> {
        let signals = self
            .manager
            .receive_prepare_for_shutdown()
            .await
            .map_err(|e| Error::Subscription(e.to_string()))?;
        let events = signals.map(|signal| {
            signal
                .args()
                .map(|args| *args.start())
                .map_err(|e| Error::Subscription(e.to_string()))
        });
        Ok(events.boxed())
    }
}
