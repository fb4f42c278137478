//! Advisory messages to every user logged in on the host.
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Program used by [`Wall`] when no other is configured.
pub const DEFAULT_WALL_PROGRAM: &str = "wall";

/// Fire-and-forget delivery of a short message to all terminals.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Broadcast `message`.
    async fn broadcast(&self, message: &str) -> anyhow::Result<()>;
}

/// [`Broadcaster`] running `wall(1)`.
#[derive(Clone, Debug)]
pub struct Wall {
    program: PathBuf,
}

impl Wall {
    /// Use the given `wall` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Wall {
            program: program.into(),
        }
    }
}

impl Default for Wall {
    fn default() -> Self {
        Wall::new(DEFAULT_WALL_PROGRAM)
    }
}

#[async_trait]
impl Broadcaster for Wall {
    async fn broadcast(&self, message: &str) -> anyhow::Result<()> {
        let output = Command::new(&self.program)
            .arg(message)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("unable to run {}: {}", self.program.display(), e))?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// The message sent while pods still hold up the shutdown.
pub fn pods_running_message(node_name: &str, label: &str, count: usize) -> String {
    format!(
        "Shutdown of node {node} is postponed: {count} pod(s) with label {label} are still running. \
         Use 'kubectl drain {node}' to move them off the node.",
        node = node_name,
        count = count,
        label = label,
    )
}
