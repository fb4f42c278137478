use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cluster::{Cluster, Error};
use crate::node::Condition;
use crate::signal::Signal;

/// Keeps the kubelet's own graceful shutdown on hold.
///
/// At startup the node gets `GracefulShutdownPostpone=True`. When `unlock` or
/// the root cancellation fires, the condition is flipped to `False` so the
/// kubelet can proceed.
pub struct NodeConditionSetter<C> {
    cluster: Arc<C>,
    node_name: String,
    label: String,
    unlock: Signal,
    cancel: Signal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Starting,
    Postponing,
    Releasing,
    Stopped,
}

impl<C: Cluster> NodeConditionSetter<C> {
    /// Create the task for `node_name`; `label` is quoted in the condition
    /// messages.
    pub fn new(
        cluster: Arc<C>,
        node_name: String,
        label: String,
        unlock: Signal,
        cancel: Signal,
    ) -> Self {
        NodeConditionSetter {
            cluster,
            node_name,
            label,
            unlock,
            cancel,
        }
    }

    /// Set the condition, wait, then clear it.
    ///
    /// Failing to set the condition is fatal since the kubelet would not wait
    /// for the pods. Failing to clear it is only logged; the kubelet goes ahead
    /// once the host shutdown proceeds anyway.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut state = State::Starting;
        let postpone = Condition::postpone(&self.label);
        tokio::select! {
            biased;
            _ = self.cancel.fired() => {
                debug!(?state, "Stopped before the condition was set");
                return Ok(());
            }
            result = self.patch(&postpone, 3) => {
                result.map_err(|e| {
                    anyhow::anyhow!("unable to set {} condition on node {}: {}", postpone.type_, self.node_name, e)
                })?;
            }
        }
        state = State::Postponing;
        debug!(?state, "Kubelet shutdown postponed");

        tokio::select! {
            _ = self.unlock.fired() => {}
            _ = self.cancel.fired() => info!("Stopping, releasing kubelet shutdown"),
        }

        state = State::Releasing;
        debug!(?state, "Releasing kubelet shutdown");
        if let Err(e) = self.patch(&Condition::release(&self.label), 2).await {
            warn!(node = %self.node_name, error = %e, "Unable to clear node condition");
        }
        state = State::Stopped;
        debug!(?state, "Node condition setter finished");
        Ok(())
    }

    async fn patch(&self, condition: &Condition, attempts: u8) -> Result<(), Error> {
        retry!(
            self.cluster.patch_node_condition(&self.node_name, condition).await,
            times: attempts,
            log_error: |e: &Error| warn!(error = %e, "Node condition patch failed")
        )
    }
}
