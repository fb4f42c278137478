//! The orchestrator: wires the signals, starts every task and decides how the
//! process ends.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::cluster::Cluster;
use crate::config::Config;
use crate::inhibit::{Inhibitor, LockKind};
use crate::signal::Signal;
use crate::tasks::{LockHolder, NodeConditionSetter, NodeCordoner, PodObserver, ShutdownSignalSource};
use crate::wall::Broadcaster;

/// How long tasks get to release their locks once the root cancellation fired.
const UNWIND_TIMEOUT: Duration = Duration::from_secs(5);

/// The graceful node shutdown inhibitor.
///
/// The inhibitor runs five tasks in parallel: the shutdown signal source, the
/// two supplementary lock holders, the node cordoner, the pod observer and the
/// node condition setter. They share two write-once signals, `shutdown` and
/// `unlock-inhibitors`, plus the root cancellation signal handed to
/// [`ShutdownInhibitor::start`].
///
/// The backends are pluggable so the same core can run against
/// systemd-logind and a live cluster, or against test doubles.
pub struct ShutdownInhibitor<C, I, W> {
    config: Arc<Config>,
    cluster: Arc<C>,
    inhibitor: Arc<I>,
    wall: Arc<W>,
}

impl<C, I, W> ShutdownInhibitor<C, I, W>
where
    C: Cluster + 'static,
    I: Inhibitor + 'static,
    W: Broadcaster + 'static,
{
    /// Create a new inhibitor from its configuration and backends.
    pub fn new(config: Config, cluster: C, inhibitor: I, wall: W) -> Self {
        Self {
            config: Arc::new(config),
            cluster: Arc::new(cluster),
            inhibitor: Arc::new(inhibitor),
            wall: Arc::new(wall),
        }
    }

    /// Run until every lock has been released.
    ///
    /// `stop` is the root cancellation: firing it makes every task release its
    /// locks and return. The first fatal task error fires it as well and is
    /// returned once the tasks have unwound, or after a bounded wait if they do
    /// not.
    pub async fn start(&self, stop: Signal) -> anyhow::Result<()> {
        let shutdown = Signal::new("shutdown");
        let unlock = Signal::new("unlock-inhibitors");
        let config = &self.config;
        info!(node = %config.node_name, label = %config.pod_label, "Starting shutdown inhibitor");

        let (fatal_sender, mut fatal_receiver) = mpsc::channel(6);
        let handles = vec![
            spawn_task(
                "shutdown-signal",
                ShutdownSignalSource::new(
                    self.inhibitor.clone(),
                    shutdown.clone(),
                    unlock.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender.clone(),
            ),
            spawn_task(
                "power-key-inhibitor",
                LockHolder::new(
                    LockKind::PowerKey,
                    self.inhibitor.clone(),
                    unlock.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender.clone(),
            ),
            spawn_task(
                "shutdown-block-inhibitor",
                LockHolder::new(
                    LockKind::ShutdownBlock,
                    self.inhibitor.clone(),
                    unlock.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender.clone(),
            ),
            spawn_task(
                "node-cordoner",
                NodeCordoner::new(
                    self.cluster.clone(),
                    config.node_name.clone(),
                    shutdown.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender.clone(),
            ),
            spawn_task(
                "pod-observer",
                PodObserver::new(
                    self.cluster.clone(),
                    self.wall.clone(),
                    config.node_name.clone(),
                    config.pod_label.clone(),
                    config.pod_matchers(),
                    config.pods_checking_interval,
                    config.wall_broadcast_interval,
                    shutdown.clone(),
                    unlock.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender.clone(),
            ),
            spawn_task(
                "node-condition-setter",
                NodeConditionSetter::new(
                    self.cluster.clone(),
                    config.node_name.clone(),
                    config.pod_label.clone(),
                    unlock.clone(),
                    stop.clone(),
                )
                .run(),
                fatal_sender,
            ),
        ];

        let tasks = futures::future::join_all(handles);
        tokio::pin!(tasks);

        let mut fatal = None;
        let finished = tokio::select! {
            results = &mut tasks => {
                fatal = first_panic(results);
                true
            }
            Some(e) = fatal_receiver.recv() => {
                error!(error = ?e, "Fatal error, releasing inhibitors");
                fatal = Some(e);
                false
            }
            _ = stop.fired() => {
                info!("Stop requested, releasing inhibitors");
                false
            }
        };

        if !finished {
            stop.fire();
            match tokio::time::timeout(UNWIND_TIMEOUT, &mut tasks).await {
                Ok(results) => {
                    let panicked = first_panic(results);
                    fatal = fatal.or(panicked);
                }
                Err(_) => warn!(
                    timeout = ?UNWIND_TIMEOUT,
                    "Tasks did not stop in time, the host releases the remaining locks on exit"
                ),
            }
        }

        if fatal.is_none() {
            fatal = fatal_receiver.try_recv().ok();
        }
        match fatal {
            Some(e) => Err(e),
            None => {
                info!("Shutdown inhibitor finished");
                Ok(())
            }
        }
    }
}

fn spawn_task<F>(
    name: &'static str,
    task: F,
    fatal: mpsc::Sender<anyhow::Error>,
) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(
        async move {
            match task.await {
                Ok(()) => debug!("Task finished"),
                Err(e) => {
                    // The receiver only goes away once the orchestrator is done.
                    let _ = fatal.send(e.context(format!("{} task failed", name))).await;
                }
            }
        }
        .instrument(info_span!("task", name)),
    )
}

fn first_panic(results: Vec<Result<(), JoinError>>) -> Option<anyhow::Error> {
    let mut panicked = None;
    for result in results {
        if let Err(e) = result {
            error!(error = %e, "Task panicked");
            if panicked.is_none() {
                panicked = Some(anyhow::anyhow!("task panicked: {}", e));
            }
        }
    }
    panicked
}
