//! The Kubernetes Adapter: every API call the inhibitor makes.
//!
//! [`Cluster`] is the narrow interface the tasks depend on; [`KubeCluster`]
//! implements it with kube-rs. Every call carries a deadline so a stuck API
//! server cannot freeze the tasks.
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Node as KubeNode, Pod as KubePod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::error::ErrorResponse;
use thiserror::Error;
use tracing::{debug, info};

use crate::node::{condition_patch, condition_status, cordon_patch, Condition};
use crate::pod::Pod;

/// Errors returned by a [`Cluster`].
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, timeout or a server-side error. Worth retrying.
    #[error("kubernetes API is unavailable: {0}")]
    Unavailable(String),
    /// The credentials are not allowed to perform the request.
    #[error("kubernetes API request is forbidden: {0}")]
    Forbidden(String),
    /// The API server rejected the request for another reason.
    #[error("kubernetes API rejected the request: {0}")]
    Rejected(String),
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ErrorResponse { code, message, .. }) => match code {
                401 | 403 => Error::Forbidden(message),
                429 | 500..=599 => Error::Unavailable(message),
                _ => Error::Rejected(message),
            },
            other => Error::Unavailable(other.to_string()),
        }
    }
}

/// The Kubernetes operations needed by the inhibitor.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// List every pod scheduled on `node_name`.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error>;

    /// Mark the node unschedulable and annotate it as cordoned by us.
    ///
    /// Repeated calls leave the node in the same state.
    async fn cordon_node(&self, node_name: &str) -> Result<(), Error>;

    /// Add or update a single condition in the node status.
    async fn patch_node_condition(&self, node_name: &str, condition: &Condition)
        -> Result<(), Error>;
}

/// [`Cluster`] backed by a kube-rs client.
///
/// The client is cheap to clone and safe to share between tasks.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
    timeout: Duration,
}

impl KubeCluster {
    /// Create an adapter applying `timeout` to every API call.
    pub fn new(client: kube::Client, timeout: Duration) -> Self {
        KubeCluster { client, timeout }
    }

    async fn with_deadline<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Unavailable(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error> {
        let pod_client: Api<KubePod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let pods = self.with_deadline(pod_client.list(&params)).await?;
        debug!(node = node_name, count = pods.items.len(), "Listed pods on node");
        Ok(pods.items.into_iter().map(Pod::from).collect())
    }

    async fn cordon_node(&self, node_name: &str) -> Result<(), Error> {
        let node_client: Api<KubeNode> = Api::all(self.client.clone());
        let patch = cordon_patch();
        self.with_deadline(node_client.patch(
            node_name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        ))
        .await?;
        info!(node = node_name, "Node cordoned");
        Ok(())
    }

    async fn patch_node_condition(
        &self,
        node_name: &str,
        condition: &Condition,
    ) -> Result<(), Error> {
        let node_client: Api<KubeNode> = Api::all(self.client.clone());
        let node = self.with_deadline(node_client.get(node_name)).await?;
        let current = condition_status(&node, &condition.type_);
        let patch = condition_patch(condition, current, Utc::now());
        self.with_deadline(node_client.patch_status(
            node_name,
            &PatchParams::default(),
            &Patch::Strategic(&patch),
        ))
        .await?;
        info!(
            node = node_name,
            condition = %condition.type_,
            status = condition.status.as_str(),
            reason = %condition.reason,
            "Node condition updated"
        );
        Ok(())
    }
}
