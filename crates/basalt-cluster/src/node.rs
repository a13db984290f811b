//! Single-node process supervision.
//!
//! A [`NodeHandle`] owns one launched OS process: its config, working
//! directory, captured output, and child handle. Handles are owned
//! exclusively by the cluster controller; everything else sees read-only
//! [`NodeView`](crate::controller::NodeView) snapshots.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::NodeConfig;
use crate::error::{ClusterError, Result};

/// Status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is stopped (never started, terminated, or exited).
    Stopped,

    /// Node process is running.
    Running,

    /// Node process exited without being asked to.
    Crashed,
}

/// A supervised node process.
#[derive(Debug)]
pub struct NodeHandle {
    /// Configuration the process was launched with.
    pub config: NodeConfig,

    /// Working directory holding `node.toml` and captured logs.
    pub dir: PathBuf,

    binary: PathBuf,
    child: Option<Child>,
    status: NodeStatus,
}

impl NodeHandle {
    /// Writes `node.toml` into `dir` and launches the node process with
    /// stdout/stderr redirected to files inside `dir`.
    pub fn launch(binary: &Path, config: NodeConfig, dir: PathBuf) -> Result<Self> {
        let mut handle = Self {
            config,
            dir,
            binary: binary.to_path_buf(),
            child: None,
            status: NodeStatus::Stopped,
        };
        handle.spawn()?;
        Ok(handle)
    }

    /// Restarts a stopped node with its retained config and directory.
    pub fn relaunch(&mut self) -> Result<()> {
        if self.is_alive() {
            return Err(ClusterError::NodeAlreadyRunning {
                role: self.config.role,
                ordinal: self.config.ordinal,
            });
        }
        self.spawn()
    }

    fn spawn(&mut self) -> Result<()> {
        let config_path = self.config.write_to(&self.dir)?;
        let stdout = std::fs::File::create(self.dir.join("stdout.log"))?;
        let stderr = std::fs::File::create(self.dir.join("stderr.log"))?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--config")
            .arg(&config_path)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // A dropped handle must never leak its process, even when the
            // driving test panics or times out before `destroy`.
            .kill_on_drop(true);
        for (key, value) in &self.config.properties {
            cmd.env(property_env_var(key), value);
        }

        let child = cmd
            .spawn()
            .map_err(|source| ClusterError::ProcessLaunchFailed {
                role: self.config.role,
                ordinal: self.config.ordinal,
                binary: self.binary.display().to_string(),
                source,
            })?;
        tracing::info!(
            role = %self.config.role,
            ordinal = self.config.ordinal,
            pid = child.id(),
            address = %self.config.service_address(),
            "launched node"
        );
        self.child = Some(child);
        self.status = NodeStatus::Running;
        Ok(())
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                if self.status == NodeStatus::Running {
                    self.status = NodeStatus::Crashed;
                }
                false
            }
            Err(_) => false,
        }
    }

    /// OS process id, while the process handle is held.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Current status (as of the last liveness check).
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Terminates the process.
    ///
    /// Graceful sends SIGTERM and waits up to `grace`, escalating to a
    /// forced kill on timeout so fault-injection tests can never hang.
    /// Idempotent: terminating an already-dead handle is a no-op.
    pub async fn terminate(&mut self, graceful: bool, grace: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if graceful && send_sigterm(&child) {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    tracing::info!(
                        role = %self.config.role,
                        ordinal = self.config.ordinal,
                        status = ?status.ok(),
                        "node exited after SIGTERM"
                    );
                    self.status = NodeStatus::Stopped;
                    return Ok(());
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        role = %self.config.role,
                        ordinal = self.config.ordinal,
                        grace = ?grace,
                        "grace period elapsed, escalating to kill"
                    );
                }
            }
        }

        child.kill().await.ok();
        let _ = tokio::time::timeout(grace, child.wait()).await;
        self.status = NodeStatus::Stopped;
        Ok(())
    }

    /// Blocks until the process exits. No-op (returns `None`) on an
    /// already-terminated handle.
    pub async fn wait(&mut self) -> Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let status = child.wait().await?;
        self.child = None;
        self.status = NodeStatus::Stopped;
        Ok(Some(status))
    }
}

/// Maps a property key like `worker.register.delay.ms` onto
/// `BASALT_WORKER_REGISTER_DELAY_MS`.
fn property_env_var(key: &str) -> String {
    let mut var = String::with_capacity(key.len() + 7);
    var.push_str("BASALT_");
    for c in key.chars() {
        if c == '.' || c == '-' {
            var.push('_');
        } else {
            var.push(c.to_ascii_uppercase());
        }
    }
    var
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    #[allow(clippy::cast_possible_wrap)]
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    // No interrupt signal to send; callers fall through to the kill path.
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ResourceAllocator;
    use crate::config::Role;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn coordinator_config(allocator: &mut ResourceAllocator) -> (NodeConfig, PathBuf) {
        let res = allocator.allocate(Role::Coordinator, 0).unwrap();
        let config = NodeConfig {
            role: Role::Coordinator,
            ordinal: 0,
            bind_address: "127.0.0.1".to_string(),
            service_port: res.service_port,
            aux_port: res.aux_port,
            masters: vec![],
            coordination: None,
            election_enabled: false,
            properties: BTreeMap::new(),
        };
        (config, res.dir)
    }

    #[tokio::test]
    async fn launch_failure_surfaces_binary() {
        let temp = TempDir::new().unwrap();
        let mut allocator = ResourceAllocator::new(temp.path().to_path_buf());
        let (config, dir) = coordinator_config(&mut allocator);

        let err = NodeHandle::launch(Path::new("/nonexistent/basalt-master"), config, dir)
            .unwrap_err();
        match err {
            ClusterError::ProcessLaunchFailed { binary, .. } => {
                assert!(binary.contains("nonexistent"));
            }
            other => panic!("expected ProcessLaunchFailed, got {other:?}"),
        }
    }

    #[test]
    fn property_env_var_mapping() {
        assert_eq!(
            property_env_var("worker.register.delay.ms"),
            "BASALT_WORKER_REGISTER_DELAY_MS"
        );
        assert_eq!(property_env_var("log-level"), "BASALT_LOG_LEVEL");
    }
}
