use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, Error};
use crate::pod::{self, PodMatcher};
use crate::signal::Signal;
use crate::wall::{pods_running_message, Broadcaster};

/// Upper bound on a single broadcast, so a stuck terminal cannot stall polling.
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides when it is safe to let the host shut down.
///
/// After `shutdown` the observer polls the pods on the node every
/// `check_interval` and fires `unlock` on the first successful poll that finds
/// no pod matching all matchers. Failed polls never count as empty, and there
/// is no deadline: the host's own inhibitor timeout bounds the wait.
///
/// While pods remain, logged-in users are told about it at most once per
/// `wall_interval`.
pub struct PodObserver<C, W> {
    cluster: Arc<C>,
    wall: Arc<W>,
    node_name: String,
    label: String,
    matchers: Vec<PodMatcher>,
    check_interval: Duration,
    wall_interval: Duration,
    shutdown: Signal,
    unlock: Signal,
    cancel: Signal,
}

impl<C: Cluster, W: Broadcaster> PodObserver<C, W> {
    /// Create the observer. `label` is only used in messages; selection is
    /// done by `matchers`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cluster: Arc<C>,
        wall: Arc<W>,
        node_name: String,
        label: String,
        matchers: Vec<PodMatcher>,
        check_interval: Duration,
        wall_interval: Duration,
        shutdown: Signal,
        unlock: Signal,
        cancel: Signal,
    ) -> Self {
        PodObserver {
            cluster,
            wall,
            node_name,
            label,
            matchers,
            check_interval,
            wall_interval,
            shutdown,
            unlock,
            cancel,
        }
    }

    /// Run until the cohort is empty or the process is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.fired() => return Ok(()),
            _ = self.shutdown.fired() => {}
        }

        info!(
            node = %self.node_name,
            interval = ?self.check_interval,
            "Waiting for pods to leave the node"
        );
        // The first tick completes immediately. A slow poll pushes the next
        // one back instead of firing the missed ticks in a burst.
        let mut ticker = time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_wall: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.fired() => {
                    info!("Stopped while pods were still running");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let drained = tokio::select! {
                biased;
                _ = self.cancel.fired() => {
                    info!("Stopped while checking pods");
                    return Ok(());
                }
                drained = self.check(&mut last_wall) => drained,
            };
            if drained {
                info!(node = %self.node_name, "No matching pods left on node");
                self.unlock.fire();
                return Ok(());
            }
        }
    }

    /// One poll. Returns whether the cohort is known to be empty.
    async fn check(&self, last_wall: &mut Option<Instant>) -> bool {
        let count = match self.count_matching().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Unable to list pods, retrying on next tick");
                return false;
            }
        };
        if count == 0 {
            return true;
        }

        info!(node = %self.node_name, count, "Matching pods still running on node");
        let due = last_wall.map_or(true, |at| at.elapsed() >= self.wall_interval);
        if due {
            *last_wall = Some(Instant::now());
            let message = pods_running_message(&self.node_name, &self.label, count);
            match time::timeout(BROADCAST_TIMEOUT, self.wall.broadcast(&message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Unable to broadcast message to users"),
                Err(_) => warn!(timeout = ?BROADCAST_TIMEOUT, "Broadcast to users timed out"),
            }
        }
        false
    }

    async fn count_matching(&self) -> Result<usize, Error> {
        let pods = self.cluster.list_pods_on_node(&self.node_name).await?;
        let matching: Vec<_> = pod::select(&pods, &self.matchers).collect();
        for pod in &matching {
            debug!(pod = %pod, "Pod is holding up shutdown");
        }
        Ok(matching.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pod::INHIBIT_NODE_SHUTDOWN_LABEL;
    use crate::test_utils::{inhibiting_pod, pod, Event, FakeCluster, FakeWall, Journal};

    struct Harness {
        journal: Journal,
        shutdown: Signal,
        unlock: Signal,
        cancel: Signal,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                journal: Journal::default(),
                shutdown: Signal::new("shutdown"),
                unlock: Signal::new("unlock-inhibitors"),
                cancel: Signal::new("cancel"),
            }
        }

        fn observer(
            &self,
            cluster: FakeCluster,
            wall: FakeWall,
            matchers: Vec<PodMatcher>,
        ) -> PodObserver<FakeCluster, FakeWall> {
            PodObserver::new(
                Arc::new(cluster),
                Arc::new(wall),
                "node-a".to_string(),
                INHIBIT_NODE_SHUTDOWN_LABEL.to_string(),
                matchers,
                Duration::from_secs(5),
                Duration::from_secs(60),
                self.shutdown.clone(),
                self.unlock.clone(),
                self.cancel.clone(),
            )
        }

        fn walls(&self) -> usize {
            self.journal.count(|e| matches!(e, Event::Wall(_)))
        }

        fn polls(&self) -> usize {
            self.journal.count(|e| matches!(e, Event::ListPods))
        }
    }

    fn matchers() -> Vec<PodMatcher> {
        vec![
            PodMatcher::LabelPresent(INHIBIT_NODE_SHUTDOWN_LABEL.to_string()),
            PodMatcher::PhaseRunning,
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_poll_before_shutdown() {
        let h = Harness::new();
        let observer = h.observer(
            FakeCluster::new(h.journal.clone()),
            FakeWall::new(h.journal.clone()),
            matchers(),
        );
        let task = tokio::spawn(observer.run());

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.polls(), 0);
        assert!(!h.unlock.is_fired());

        h.cancel.fire();
        task.await.unwrap().unwrap();
        assert!(!h.unlock.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cohort_unlocks_on_first_poll() {
        let h = Harness::new();
        let cluster = FakeCluster::new(h.journal.clone()).with_listing(Ok(vec![
            pod("web", &[], Some("Running")),
            pod("done", &[(INHIBIT_NODE_SHUTDOWN_LABEL, "")], Some("Succeeded")),
        ]));
        let observer = h.observer(cluster, FakeWall::new(h.journal.clone()), matchers());
        h.shutdown.fire();

        observer.run().await.unwrap();

        assert!(h.unlock.is_fired());
        assert_eq!(h.polls(), 1);
        assert_eq!(h.walls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_matchers_unlock_after_one_poll() {
        let h = Harness::new();
        let cluster =
            FakeCluster::new(h.journal.clone()).with_listing(Ok(vec![inhibiting_pod("db-0")]));
        let observer = h.observer(cluster, FakeWall::new(h.journal.clone()), Vec::new());
        h.shutdown.fire();

        observer.run().await.unwrap();
        assert!(h.unlock.is_fired());
        assert_eq!(h.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_errors_never_unlock() {
        let h = Harness::new();
        let cluster = FakeCluster::new(h.journal.clone())
            .with_listings(3, || Err(Error::Unavailable("connection refused".to_string())))
            .with_listing(Err(Error::Forbidden("pods".to_string())))
            .with_listing(Ok(Vec::new()));
        let observer = h.observer(cluster, FakeWall::new(h.journal.clone()), matchers());
        h.shutdown.fire();

        let started = Instant::now();
        observer.run().await.unwrap();

        assert!(h.unlock.is_fired());
        assert_eq!(h.polls(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_once_per_interval() {
        let h = Harness::new();
        // Polls happen at 0, 5, ..., 125s; the cohort drains at 130s.
        let cluster = FakeCluster::new(h.journal.clone())
            .with_listings(26, || Ok(vec![inhibiting_pod("db-0")]))
            .with_listing(Ok(Vec::new()));
        let observer = h.observer(cluster, FakeWall::new(h.journal.clone()), matchers());
        h.shutdown.fire();

        observer.run().await.unwrap();

        assert!(h.unlock.is_fired());
        // Broadcasts at 0, 60 and 120s.
        assert_eq!(h.walls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_failure_is_ignored() {
        let h = Harness::new();
        let cluster = FakeCluster::new(h.journal.clone())
            .with_listing(Ok(vec![inhibiting_pod("db-0")]))
            .with_listing(Ok(Vec::new()));
        let observer = h.observer(cluster, FakeWall::failing(h.journal.clone()), matchers());
        h.shutdown.fire();

        observer.run().await.unwrap();

        assert!(h.unlock.is_fired());
        assert_eq!(h.walls(), 1);
    }

    /// A terminal that never accepts the message.
    struct StuckWall;

    #[async_trait::async_trait]
    impl Broadcaster for StuckWall {
        async fn broadcast(&self, _message: &str) -> anyhow::Result<()> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_broadcast_does_not_stall_polling() {
        let h = Harness::new();
        let cluster = FakeCluster::new(h.journal.clone())
            .with_listing(Ok(vec![inhibiting_pod("db-0")]))
            .with_listing(Ok(Vec::new()));
        let observer = PodObserver::new(
            Arc::new(cluster),
            Arc::new(StuckWall),
            "node-a".to_string(),
            INHIBIT_NODE_SHUTDOWN_LABEL.to_string(),
            matchers(),
            Duration::from_secs(5),
            Duration::from_secs(60),
            h.shutdown.clone(),
            h.unlock.clone(),
            h.cancel.clone(),
        );
        h.shutdown.fire();

        let started = Instant::now();
        observer.run().await.unwrap();

        assert!(h.unlock.is_fired());
        assert_eq!(h.polls(), 2);
        assert!(started.elapsed() <= BROADCAST_TIMEOUT + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stuck_broadcast() {
        let h = Harness::new();
        let cluster =
            FakeCluster::new(h.journal.clone()).with_listing(Ok(vec![inhibiting_pod("db-0")]));
        let observer = PodObserver::new(
            Arc::new(cluster),
            Arc::new(StuckWall),
            "node-a".to_string(),
            INHIBIT_NODE_SHUTDOWN_LABEL.to_string(),
            matchers(),
            Duration::from_secs(5),
            Duration::from_secs(60),
            h.shutdown.clone(),
            h.unlock.clone(),
            h.cancel.clone(),
        );
        h.shutdown.fire();
        let task = tokio::spawn(observer.run());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.polls(), 1);
        h.cancel.fire();

        time::timeout(Duration::from_secs(1), task)
            .await
            .expect("observer ignored cancellation")
            .unwrap()
            .unwrap();
        assert!(!h.unlock.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_delays_next_tick() {
        let h = Harness::new();
        // The first listing takes 12s: ticks due at 5 and 10s are missed.
        let cluster = FakeCluster::new(h.journal.clone())
            .slow_first_listing(Duration::from_secs(12))
            .with_listing(Ok(vec![inhibiting_pod("db-0")]));
        let observer = h.observer(cluster, FakeWall::new(h.journal.clone()), matchers());
        h.shutdown.fire();
        let task = tokio::spawn(observer.run());

        // One catch-up poll at 12s, the next one not before 17s.
        time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(h.polls(), 2);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.polls(), 3);

        h.cancel.fire();
        task.await.unwrap().unwrap();
    }
}
