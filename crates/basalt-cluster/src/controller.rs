//! Cluster controller: owns the topology, drives startup ordering, tracks
//! process handles, and guarantees deterministic teardown.
//!
//! Startup order is coordination ensemble, then masters, then workers;
//! teardown is the strict reverse so dependents are removed before their
//! dependencies. Node handles are owned exclusively by the controller;
//! callers observe them through read-only [`NodeView`] snapshots.
//!
//! Lifecycle: `Unstarted -> Starting -> Running -> Destroyed`, with
//! `Failed` reachable from any startup error. A failed start leaves
//! already-launched nodes running so [`Cluster::save_workdir`] can capture
//! logs before [`Cluster::destroy`] reaps them. The controller is not
//! thread-safe; callers must serialize access to one instance.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use tokio::net::TcpStream;

use basalt_client::FsClient;

use crate::allocator::ResourceAllocator;
use crate::config::{NodeConfig, Role};
use crate::coordination::CoordinationEnsemble;
use crate::diagnostics;
use crate::error::{ClusterError, Result};
use crate::node::{NodeHandle, NodeStatus};
use crate::probe;
use crate::spec::{ClusterBuilder, ClusterSpec};

/// Poll interval while waiting for the first master to accept connections.
const BIND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a [`Cluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    /// Built but never started.
    Unstarted,

    /// `start` is in flight.
    Starting,

    /// Topology is live and was probed ready.
    Running,

    /// `start` failed; nodes may still be running for diagnostics.
    Failed,

    /// Terminal: every process reaped, ephemeral root removed.
    Destroyed,
}

impl ClusterStatus {
    fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Unstarted => "unstarted",
            ClusterStatus::Starting => "starting",
            ClusterStatus::Running => "running",
            ClusterStatus::Failed => "failed",
            ClusterStatus::Destroyed => "destroyed",
        }
    }
}

/// Connection descriptor bound to a running cluster.
///
/// Owned by the caller, not the controller; it becomes invalid once the
/// cluster leaves `Running` and must not be used after `destroy`.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    masters: Vec<SocketAddr>,
}

impl ClientHandle {
    /// Master entry-point addresses.
    pub fn masters(&self) -> &[SocketAddr] {
        &self.masters
    }

    /// Constructs a filesystem client bound to these masters.
    pub fn fs_client(&self) -> FsClient {
        FsClient::new(self.masters.clone())
    }
}

/// Read-only snapshot of one supervised node.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub role: Role,
    pub ordinal: usize,
    pub service_address: String,
    pub service_port: u16,
    pub aux_port: u16,
    pub dir: PathBuf,
    pub pid: Option<u32>,
    pub status: NodeStatus,
}

/// A multi-process test cluster.
#[derive(Debug)]
pub struct Cluster {
    spec: ClusterSpec,
    status: ClusterStatus,
    root: Option<TempDir>,
    ensemble: Option<CoordinationEnsemble>,
    masters: Vec<NodeHandle>,
    workers: Vec<NodeHandle>,
}

impl Cluster {
    /// Starts declaring a topology.
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::new()
    }

    pub(crate) fn from_spec(spec: ClusterSpec) -> Self {
        Self {
            spec,
            status: ClusterStatus::Unstarted,
            root: None,
            ensemble: None,
            masters: vec![],
            workers: vec![],
        }
    }

    /// The immutable topology declaration.
    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ClusterStatus {
        self.status
    }

    /// Launches the declared topology and blocks until the cluster is
    /// ready or the deadline expires.
    ///
    /// A second call fails with [`ClusterError::AlreadyStarted`]. On
    /// failure the state is `Failed` and already-launched nodes keep
    /// running; the caller is expected to call [`Cluster::save_workdir`]
    /// (if diagnostics are wanted) and then [`Cluster::destroy`].
    pub async fn start(&mut self) -> Result<()> {
        match self.status {
            ClusterStatus::Unstarted => {}
            ClusterStatus::Destroyed => return Err(ClusterError::ClusterDestroyed),
            _ => return Err(ClusterError::AlreadyStarted),
        }
        self.status = ClusterStatus::Starting;
        let deadline = Instant::now() + self.spec.ready_timeout;

        match self.start_inner(deadline).await {
            Ok(()) => {
                self.status = ClusterStatus::Running;
                tracing::info!(
                    name = %self.spec.name,
                    masters = self.spec.masters,
                    workers = self.spec.workers,
                    coordination = self.spec.coordination_enabled,
                    "cluster running"
                );
                Ok(())
            }
            Err(err) => {
                self.status = ClusterStatus::Failed;
                tracing::warn!(
                    name = %self.spec.name,
                    error = %err,
                    "cluster start failed; nodes left running for diagnostics"
                );
                Err(err)
            }
        }
    }

    async fn start_inner(&mut self, deadline: Instant) -> Result<()> {
        let root = tempfile::Builder::new()
            .prefix(&format!("basalt-{}-", self.spec.name))
            .tempdir()?;
        let mut allocator = ResourceAllocator::new(root.path().to_path_buf());
        self.root = Some(root);

        // Coordination ensemble first: masters hold a session with it.
        let connect_string = if self.spec.coordination_enabled {
            let ensemble = CoordinationEnsemble::allocate(&mut allocator, &self.spec)?;
            let connect = ensemble.connection_string().to_string();
            let binary = self.spec.coordinator_binary.clone();
            self.ensemble.insert(ensemble).launch(&binary)?;
            Some(connect)
        } else {
            None
        };

        // Allocate every master up front so each one sees the full peer set.
        let mut resources = Vec::with_capacity(self.spec.masters);
        for ordinal in 0..self.spec.masters {
            resources.push(allocator.allocate(Role::Master, ordinal)?);
        }
        let master_addrs: Vec<String> = resources
            .iter()
            .map(|res| format!("127.0.0.1:{}", res.service_port))
            .collect();

        for (ordinal, res) in resources.into_iter().enumerate() {
            let config = NodeConfig {
                role: Role::Master,
                ordinal,
                bind_address: "127.0.0.1".to_string(),
                service_port: res.service_port,
                aux_port: res.aux_port,
                masters: master_addrs.clone(),
                coordination: connect_string.clone(),
                election_enabled: connect_string.is_some(),
                properties: self.spec.properties.clone(),
            };
            self.masters
                .push(NodeHandle::launch(&self.spec.master_binary, config, res.dir)?);
        }

        // Workers register against masters, so hold them back until at
        // least one master is bind-ready.
        self.await_master_bind(deadline).await?;

        for ordinal in 0..self.spec.workers {
            let res = allocator.allocate(Role::Worker, ordinal)?;
            let config = NodeConfig {
                role: Role::Worker,
                ordinal,
                bind_address: "127.0.0.1".to_string(),
                service_port: res.service_port,
                aux_port: res.aux_port,
                masters: master_addrs.clone(),
                coordination: None,
                election_enabled: false,
                properties: self.spec.properties.clone(),
            };
            self.workers
                .push(NodeHandle::launch(&self.spec.worker_binary, config, res.dir)?);
        }

        let client = FsClient::new(self.master_addrs());
        probe::await_ready(&client, deadline).await
    }

    async fn await_master_bind(&self, deadline: Instant) -> Result<()> {
        let addrs = self.master_addrs();
        let started = Instant::now();
        loop {
            for addr in &addrs {
                if TcpStream::connect(addr).await.is_ok() {
                    tracing::debug!(addr = %addr, "master bind-ready");
                    return Ok(());
                }
            }
            if Instant::now() + BIND_POLL_INTERVAL >= deadline {
                return Err(ClusterError::ClusterNotReady {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(BIND_POLL_INTERVAL).await;
        }
    }

    /// Connection descriptor for the running cluster.
    pub fn client_handle(&self) -> Result<ClientHandle> {
        self.ensure_running()?;
        Ok(ClientHandle {
            masters: self.master_addrs(),
        })
    }

    /// Terminates one master or worker, for fault-injection tests.
    ///
    /// Cluster state stays `Running`; whether the remaining masters hold
    /// quorum is the coordination protocol's business, not the
    /// controller's.
    pub async fn stop_node(&mut self, role: Role, ordinal: usize) -> Result<()> {
        self.ensure_running()?;
        let grace = self.spec.grace_period;
        let node = self.find_node_mut(role, ordinal)?;
        tracing::info!(role = %role, ordinal, "stopping node");
        node.terminate(true, grace).await
    }

    /// Restarts a node previously stopped by [`Cluster::stop_node`], with
    /// its original ports, directory, and configuration.
    pub fn start_node(&mut self, role: Role, ordinal: usize) -> Result<()> {
        self.ensure_running()?;
        let node = self.find_node_mut(role, ordinal)?;
        tracing::info!(role = %role, ordinal, "restarting node");
        node.relaunch()
    }

    /// Archives every node working directory (including captured logs)
    /// under the artifacts root, one directory per node.
    ///
    /// Best-effort: per-node copy failures are logged and skipped. Safe to
    /// call multiple times and in any state — including after a failed
    /// `start`, which is the intended diagnostics path.
    pub fn save_workdir(&self) -> Result<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dest_root = self
            .spec
            .artifacts_root()
            .join(format!("{}-{millis}", self.spec.name));
        std::fs::create_dir_all(&dest_root)?;

        for node in self.all_nodes() {
            let dest = dest_root.join(format!("{}-{}", node.config.role, node.config.ordinal));
            if let Err(err) = diagnostics::snapshot_dir(&node.dir, &dest) {
                tracing::warn!(
                    role = %node.config.role,
                    ordinal = node.config.ordinal,
                    error = %err,
                    "failed to snapshot node workdir, continuing"
                );
            }
        }
        tracing::info!(dest = %dest_root.display(), "saved cluster workdirs");
        Ok(dest_root)
    }

    /// Terminates every still-alive node in reverse startup order
    /// (workers, masters, coordination ensemble) and removes the ephemeral
    /// root. Idempotent, and tolerates nodes already killed by a test.
    pub async fn destroy(&mut self) -> Result<()> {
        if self.status == ClusterStatus::Destroyed {
            return Ok(());
        }
        let grace = self.spec.grace_period;

        for worker in &mut self.workers {
            if let Err(err) = worker.terminate(true, grace).await {
                tracing::warn!(
                    ordinal = worker.config.ordinal,
                    error = %err,
                    "ignoring worker teardown failure"
                );
            }
        }
        for master in &mut self.masters {
            if let Err(err) = master.terminate(true, grace).await {
                tracing::warn!(
                    ordinal = master.config.ordinal,
                    error = %err,
                    "ignoring master teardown failure"
                );
            }
        }
        if let Some(ensemble) = self.ensemble.as_mut() {
            ensemble.stop(grace).await;
        }
        self.workers.clear();
        self.masters.clear();
        self.ensemble = None;

        if let Some(root) = self.root.take() {
            if let Err(err) = root.close() {
                tracing::warn!(error = %err, "failed to remove ephemeral root");
            }
        }
        self.status = ClusterStatus::Destroyed;
        tracing::info!(name = %self.spec.name, "cluster destroyed");
        Ok(())
    }

    /// Read-only snapshots of every supervised node, liveness refreshed.
    pub fn nodes(&mut self) -> Vec<NodeView> {
        let mut views = Vec::new();
        let ensemble_members = self
            .ensemble
            .as_mut()
            .map(CoordinationEnsemble::members_mut)
            .unwrap_or_default();
        for node in self
            .masters
            .iter_mut()
            .chain(self.workers.iter_mut())
            .chain(ensemble_members.iter_mut())
        {
            let _ = node.is_alive();
            views.push(NodeView {
                role: node.config.role,
                ordinal: node.config.ordinal,
                service_address: node.config.service_address(),
                service_port: node.config.service_port,
                aux_port: node.config.aux_port,
                dir: node.dir.clone(),
                pid: node.pid(),
                status: node.status(),
            });
        }
        views
    }

    fn all_nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        let ensemble_members = self
            .ensemble
            .as_ref()
            .map(CoordinationEnsemble::members)
            .unwrap_or_default();
        self.masters
            .iter()
            .chain(self.workers.iter())
            .chain(ensemble_members.iter())
    }

    fn master_addrs(&self) -> Vec<SocketAddr> {
        self.masters
            .iter()
            .map(|m| SocketAddr::from((Ipv4Addr::LOCALHOST, m.config.service_port)))
            .collect()
    }

    fn find_node_mut(&mut self, role: Role, ordinal: usize) -> Result<&mut NodeHandle> {
        let tier = match role {
            Role::Master => &mut self.masters,
            Role::Worker => &mut self.workers,
            // Targeted lifecycle control covers masters and workers only.
            Role::Coordinator => return Err(ClusterError::NodeNotFound { role, ordinal }),
        };
        tier.get_mut(ordinal)
            .ok_or(ClusterError::NodeNotFound { role, ordinal })
    }

    fn ensure_running(&self) -> Result<()> {
        match self.status {
            ClusterStatus::Running => Ok(()),
            ClusterStatus::Destroyed => Err(ClusterError::ClusterDestroyed),
            other => Err(ClusterError::ClusterNotRunning {
                state: other.as_str(),
            }),
        }
    }
}
