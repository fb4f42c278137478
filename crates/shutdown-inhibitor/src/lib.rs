//! A crate for postponing a host shutdown until a cohort of Kubernetes pods has
//! left the node.
//!
//! The host init system (systemd-logind) lets processes take *inhibitor locks*
//! that delay or block a shutdown. [`ShutdownInhibitor`] takes those locks when
//! it starts, waits for the host to announce an upcoming shutdown, cordons the
//! node and then watches the pods labelled with
//! `pod.deckhouse.io/inhibit-node-shutdown`. Once none of them is running on the
//! node any more, every lock is released and the shutdown continues.
//!
//! The crate talks to the outside world through three narrow traits, so the
//! core can run against anything that implements them:
//!
//! * [`Inhibitor`](inhibit::Inhibitor) for the host power-management locks,
//! * [`Cluster`](cluster::Cluster) for the Kubernetes API,
//! * [`Broadcaster`](wall::Broadcaster) for messages to logged-in users.
//!
//! # Example
//! ```rust,no_run
//! use shutdown_inhibitor::cluster::KubeCluster;
//! use shutdown_inhibitor::config::Config;
//! use shutdown_inhibitor::inhibit::logind::Logind;
//! use shutdown_inhibitor::signal::Signal;
//! use shutdown_inhibitor::wall::Wall;
//! use shutdown_inhibitor::ShutdownInhibitor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default_config()?;
//!     let kube_config = shutdown_inhibitor::kubeconfig::load(None).await?;
//!     let client = kube::Client::try_from(kube_config)?;
//!
//!     let cluster = KubeCluster::new(client, config.api_timeout);
//!     let inhibitor = Logind::connect().await?;
//!     let wall = Wall::new(&config.wall_program);
//!
//!     let inhibitor = ShutdownInhibitor::new(config, cluster, inhibitor, wall);
//!     inhibitor.start(Signal::new("stop")).await
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

#[macro_use]
mod macros;

pub mod cluster;
pub mod config;
pub mod inhibit;
mod inhibitor;
pub mod kubeconfig;
pub mod node;
pub mod pod;
pub mod signal;
pub mod tasks;
pub mod wall;

#[cfg(test)]
pub(crate) mod test_utils;

pub use self::inhibitor::ShutdownInhibitor;
