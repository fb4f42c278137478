//! Loading of Kubernetes credentials.
use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::debug;

/// Load the client configuration.
///
/// An explicit kubeconfig `path` wins. Without one the in-cluster service
/// account is used, falling back to the usual kubeconfig discovery
/// (`$KUBECONFIG`, `~/.kube/config`).
pub async fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        debug!(path = %path.display(), "Loading kubeconfig");
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            anyhow::anyhow!("Unable to read kubeconfig {}: {}", path.display(), e)
        })?;
        return Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| anyhow::anyhow!("Invalid kubeconfig {}: {}", path.display(), e));
    }

    match Config::from_cluster_env() {
        Ok(config) => {
            debug!("Using in-cluster service account");
            Ok(config)
        }
        Err(in_cluster) => {
            debug!(error = %in_cluster, "No in-cluster configuration, inferring kubeconfig");
            Config::infer()
                .await
                .map_err(|e| anyhow::anyhow!("Unable to load Kubernetes credentials: {}", e))
        }
    }
}
