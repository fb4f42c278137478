//! Configuration for the shutdown inhibitor
//!
//! The best way to configure the inhibitor is by using [`Config::default_config`]
//! or by turning on the "cli" feature and using [`Config::new_from_flags`].

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::pod::{PodMatcher, INHIBIT_NODE_SHUTDOWN_LABEL};
use crate::wall::DEFAULT_WALL_PROGRAM;

const DEFAULT_PODS_CHECKING_INTERVAL: u64 = 5;
const DEFAULT_WALL_BROADCAST_INTERVAL: u64 = 60;
const DEFAULT_API_TIMEOUT: u64 = 10;

/// The configuration needed for the inhibitor to run properly.
///
/// This can be configured manually in your code or if you are exposing a CLI, use the
/// [`Config::new_from_flags`] (this requires the "cli" feature to
/// be enabled).
#[derive(Clone, Debug)]
pub struct Config {
    /// The name of the node this process runs on
    pub node_name: String,
    /// Explicit kubeconfig; the in-cluster service account is used without one
    pub kubeconfig: Option<PathBuf>,
    /// Pods carrying this label postpone the shutdown while they run
    pub pod_label: String,
    /// How often pods are checked once the host announced a shutdown
    pub pods_checking_interval: Duration,
    /// Minimum time between two messages to logged-in users
    pub wall_broadcast_interval: Duration,
    /// Deadline of a single Kubernetes API call
    pub api_timeout: Duration,
    /// The program used to message logged-in users
    pub wall_program: PathBuf,
}

impl Config {
    /// Returns a Config object set with all of the defaults, naming the node
    /// after the host.
    pub fn default_config() -> anyhow::Result<Self> {
        Ok(Config {
            node_name: sanitize_hostname(&default_hostname()?),
            kubeconfig: None,
            pod_label: INHIBIT_NODE_SHUTDOWN_LABEL.to_string(),
            pods_checking_interval: Duration::from_secs(DEFAULT_PODS_CHECKING_INTERVAL),
            wall_broadcast_interval: Duration::from_secs(DEFAULT_WALL_BROADCAST_INTERVAL),
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT),
            wall_program: PathBuf::from(DEFAULT_WALL_PROGRAM),
        })
    }

    /// The matchers selecting the pods the inhibitor waits for: running pods
    /// carrying [`Config::pod_label`].
    pub fn pod_matchers(&self) -> Vec<PodMatcher> {
        vec![
            PodMatcher::LabelPresent(self.pod_label.clone()),
            PodMatcher::PhaseRunning,
        ]
    }

    /// Check the values that cannot be expressed by the types alone.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.is_empty() {
            anyhow::bail!("node name must not be empty");
        }
        if self.pod_label.is_empty() {
            anyhow::bail!("pod label must not be empty");
        }
        for (name, value) in [
            ("pods checking interval", self.pods_checking_interval),
            ("wall broadcast interval", self.wall_broadcast_interval),
            ("API timeout", self.api_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> anyhow::Result<Self> {
        let app = Opts::clap().version(version);
        Self::from_opts(Opts::from_clap(&app.get_matches()))
    }

    #[cfg(feature = "cli")]
    fn from_opts(opts: Opts) -> anyhow::Result<Self> {
        let node_name = match opts.node_name {
            Some(name) => name,
            None => sanitize_hostname(&default_hostname()?),
        };
        let config = Config {
            node_name,
            kubeconfig: opts.kubeconfig,
            pod_label: opts.pod_label,
            pods_checking_interval: Duration::from_secs(opts.pods_checking_interval),
            wall_broadcast_interval: Duration::from_secs(opts.wall_broadcast_interval),
            api_timeout: Duration::from_secs(opts.api_timeout),
            wall_program: opts.wall_program,
        };
        config.validate()?;
        Ok(config)
    }
}

/// CLI options that can be configured for the inhibitor
///
/// These can be parsed from args using `Opts::from_args()`
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "d8-shutdown-inhibitor",
    about = "Postpones the host shutdown until labelled pods have left the node"
)]
pub struct Opts {
    #[structopt(
        long = "node-name",
        env = "NODE_NAME",
        help = "The name of this node in Kubernetes, defaults to the hostname of this machine"
    )]
    node_name: Option<String>,

    #[structopt(
        long = "kubeconfig",
        env = "KUBECONFIG",
        help = "Path to a kubeconfig. Defaults to the in-cluster service account"
    )]
    kubeconfig: Option<PathBuf>,

    #[structopt(
        long = "pod-label",
        env = "INHIBIT_POD_LABEL",
        default_value = INHIBIT_NODE_SHUTDOWN_LABEL,
        help = "Running pods with this label postpone the node shutdown"
    )]
    pod_label: String,

    #[structopt(
        long = "pods-checking-interval",
        env = "PODS_CHECKING_INTERVAL",
        default_value = "5",
        help = "Seconds between two pod checks once a shutdown is announced"
    )]
    pods_checking_interval: u64,

    #[structopt(
        long = "wall-broadcast-interval",
        env = "WALL_BROADCAST_INTERVAL",
        default_value = "60",
        help = "Minimum seconds between two messages to logged-in users"
    )]
    wall_broadcast_interval: u64,

    #[structopt(
        long = "api-timeout",
        env = "KUBE_API_TIMEOUT",
        default_value = "10",
        help = "Deadline in seconds of a single Kubernetes API call"
    )]
    api_timeout: u64,

    #[structopt(
        long = "wall-program",
        env = "WALL_PROGRAM",
        default_value = DEFAULT_WALL_PROGRAM,
        help = "Program used to message logged-in users"
    )]
    wall_program: PathBuf,
}

fn default_hostname() -> anyhow::Result<String> {
    hostname::get()?
        .into_string()
        .map_err(|_| anyhow::anyhow!("invalid utf-8 hostname string"))
}

// Some hostnames (particularly local ones) can have uppercase letters, which is
// disallowed by the DNS spec used in kubernetes naming. This sanitizes those
// names
fn sanitize_hostname(hostname: &str) -> String {
    hostname.to_lowercase()
}
