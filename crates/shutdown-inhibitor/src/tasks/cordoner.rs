use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::signal::Signal;

/// Cordons the node once the host announced a shutdown.
pub struct NodeCordoner<C> {
    cluster: Arc<C>,
    node_name: String,
    shutdown: Signal,
    cancel: Signal,
}

impl<C: Cluster> NodeCordoner<C> {
    /// Create the task for `node_name`.
    pub fn new(cluster: Arc<C>, node_name: String, shutdown: Signal, cancel: Signal) -> Self {
        NodeCordoner {
            cluster,
            node_name,
            shutdown,
            cancel,
        }
    }

    /// Wait for `shutdown` and cordon the node once.
    ///
    /// Nothing is done if the process is cancelled first. A failed cordon is
    /// logged and not retried.
    pub async fn run(self) -> anyhow::Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.fired() => {
                info!("Stopped before shutdown, node left schedulable");
                return Ok(());
            }
            _ = self.shutdown.fired() => {}
        }

        if let Err(e) = self.cluster.cordon_node(&self.node_name).await {
            warn!(node = %self.node_name, error = %e, "Unable to cordon node");
        }
        Ok(())
    }
}
