use shutdown_inhibitor::cluster::KubeCluster;
use shutdown_inhibitor::config::Config;
use shutdown_inhibitor::inhibit::logind::Logind;
use shutdown_inhibitor::kubeconfig;
use shutdown_inhibitor::signal::Signal;
use shutdown_inhibitor::wall::Wall;
use shutdown_inhibitor::ShutdownInhibitor;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::new_from_flags(env!("CARGO_PKG_VERSION"))?;

    // Read the environment. An explicit kubeconfig wins, then the in-cluster
    // service account, then the usual kubeconfig lookup.
    let kube_config = kubeconfig::load(config.kubeconfig.as_deref()).await?;
    let client = kube::Client::try_from(kube_config)?;
    let cluster = KubeCluster::new(client, config.api_timeout);

    // Without logind there is nothing to protect, so bail out before touching
    // the cluster.
    let inhibitor = Logind::connect().await?;
    let wall = Wall::new(&config.wall_program);

    let stop = Signal::new("stop");
    let mut terminate = signal(SignalKind::terminate())?;
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = terminate.recv() => info!("Received SIGTERM"),
            }
            stop.fire();
        });
    }

    ShutdownInhibitor::new(config, cluster, inhibitor, wall)
        .start(stop)
        .await
}
