//! In-memory stand-ins for the host, the cluster and the terminals. Every call
//! is recorded in a shared [`Journal`] so tests can assert on ordering.
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod as KubePod, PodStatus};
use kube::api::ObjectMeta;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cluster::{Cluster, Error as ClusterError};
use crate::inhibit::{
    Error as InhibitError, InhibitLock, Inhibitor, LockHandle, LockKind, ShutdownEvents,
};
use crate::node::{Condition, ConditionStatus};
use crate::pod::Pod;
use crate::wall::Broadcaster;

pub fn pod(name: &str, labels: &[(&str, &str)], phase: Option<&str>) -> Pod {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Pod::from(KubePod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: phase.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn inhibiting_pod(name: &str) -> Pod {
    pod(
        name,
        &[(crate::pod::INHIBIT_NODE_SHUTDOWN_LABEL, "")],
        Some("Running"),
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Acquired(LockKind),
    Released(LockKind),
    ListPods,
    Cordon,
    Condition(ConditionStatus),
    Wall(String),
}

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn conditions(&self) -> Vec<ConditionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Condition(status) => Some(status),
                _ => None,
            })
            .collect()
    }
}

/// Scripted pod listings. Each call pops the next response; the last one
/// repeats forever.
pub struct FakeCluster {
    journal: Journal,
    listings: Mutex<VecDeque<Result<Vec<Pod>, ClusterError>>>,
    last: Mutex<Vec<Pod>>,
    first_latency: Mutex<Option<Duration>>,
    fail_conditions: bool,
}

impl FakeCluster {
    pub fn new(journal: Journal) -> Self {
        FakeCluster {
            journal,
            listings: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            first_latency: Mutex::new(None),
            fail_conditions: false,
        }
    }

    pub fn with_listing(self, listing: Result<Vec<Pod>, ClusterError>) -> Self {
        self.listings.lock().unwrap().push_back(listing);
        self
    }

    pub fn with_listings(
        self,
        times: usize,
        listing: impl Fn() -> Result<Vec<Pod>, ClusterError>,
    ) -> Self {
        (0..times).fold(self, |cluster, _| cluster.with_listing(listing()))
    }

    /// The first listing answers only after `latency`.
    pub fn slow_first_listing(self, latency: Duration) -> Self {
        *self.first_latency.lock().unwrap() = Some(latency);
        self
    }

    pub fn failing_conditions(mut self) -> Self {
        self.fail_conditions = true;
        self
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn list_pods_on_node(&self, _node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        self.journal.record(Event::ListPods);
        let latency = self.first_latency.lock().unwrap().take();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.listings.lock().unwrap().pop_front();
        match next {
            Some(Ok(pods)) => {
                *self.last.lock().unwrap() = pods.clone();
                Ok(pods)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }

    async fn cordon_node(&self, _node_name: &str) -> Result<(), ClusterError> {
        self.journal.record(Event::Cordon);
        Ok(())
    }

    async fn patch_node_condition(
        &self,
        _node_name: &str,
        condition: &Condition,
    ) -> Result<(), ClusterError> {
        if self.fail_conditions {
            return Err(ClusterError::Forbidden("nodes/status".to_string()));
        }
        self.journal.record(Event::Condition(condition.status));
        Ok(())
    }
}

struct FakeHandle {
    kind: LockKind,
    journal: Journal,
}

impl LockHandle for FakeHandle {
    fn release(self: Box<Self>) -> Result<(), InhibitError> {
        self.journal.record(Event::Released(self.kind));
        Ok(())
    }
}

/// A host whose shutdown announcements are sent by the test.
pub struct FakeInhibitor {
    journal: Journal,
    refused: HashSet<LockKind>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<bool, InhibitError>>>>,
}

impl FakeInhibitor {
    pub fn new(journal: Journal) -> (Self, mpsc::UnboundedSender<Result<bool, InhibitError>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inhibitor = FakeInhibitor {
            journal,
            refused: HashSet::new(),
            events: Mutex::new(Some(receiver)),
        };
        (inhibitor, sender)
    }

    pub fn refusing(mut self, kind: LockKind) -> Self {
        self.refused.insert(kind);
        self
    }
}

#[async_trait]
impl Inhibitor for FakeInhibitor {
    async fn acquire(&self, kind: LockKind) -> Result<InhibitLock, InhibitError> {
        if self.refused.contains(&kind) {
            return Err(InhibitError::LockRefused {
                kind,
                reason: "access denied".to_string(),
            });
        }
        self.journal.record(Event::Acquired(kind));
        Ok(InhibitLock::new(
            kind,
            Box::new(FakeHandle {
                kind,
                journal: self.journal.clone(),
            }),
        ))
    }

    async fn subscribe_shutdown(&self) -> Result<ShutdownEvents, InhibitError> {
        let receiver = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| InhibitError::Subscription("already subscribed".to_string()))?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

pub struct FakeWall {
    journal: Journal,
    fail: bool,
}

impl FakeWall {
    pub fn new(journal: Journal) -> Self {
        FakeWall {
            journal,
            fail: false,
        }
    }

    pub fn failing(journal: Journal) -> Self {
        FakeWall { journal, fail: true }
    }
}

#[async_trait]
impl Broadcaster for FakeWall {
    async fn broadcast(&self, message: &str) -> anyhow::Result<()> {
        self.journal.record(Event::Wall(message.to_string()));
        if self.fail {
            anyhow::bail!("no terminals");
        }
        Ok(())
    }
}
