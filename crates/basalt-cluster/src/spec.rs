//! Immutable cluster topology declaration and its builder.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::Cluster;
use crate::error::{ClusterError, Result};

/// Default deadline for the cluster to become ready after `start`.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period before a graceful terminate escalates to kill.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default coordination-ensemble size.
const DEFAULT_ENSEMBLE_SIZE: usize = 3;

/// Immutable descriptor of a desired cluster topology.
///
/// Built once via [`ClusterBuilder`] and never mutated after `start`.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    /// Cluster name, used to namespace working directories and artifacts.
    pub name: String,

    /// Number of master processes (>= 1).
    pub masters: usize,

    /// Number of worker processes (>= 0).
    pub workers: usize,

    /// Whether to run a coordination ensemble for master leader election.
    pub coordination_enabled: bool,

    /// Coordination-ensemble size when enabled.
    pub ensemble_size: usize,

    /// Arbitrary configuration-key overrides applied to every node.
    pub properties: BTreeMap<String, String>,

    /// Master binary to launch.
    pub master_binary: PathBuf,

    /// Worker binary to launch.
    pub worker_binary: PathBuf,

    /// Coordination-member binary to launch.
    pub coordinator_binary: PathBuf,

    /// Deadline for `start` to reach readiness.
    pub ready_timeout: Duration,

    /// Grace period for graceful termination before escalation.
    pub grace_period: Duration,

    /// Where `save_workdir` archives go. Defaults to
    /// `$BASALT_ARTIFACTS_DIR` or `<tmp>/basalt-artifacts`.
    pub artifacts_dir: Option<PathBuf>,
}

impl ClusterSpec {
    /// Archive root for diagnostics snapshots.
    pub(crate) fn artifacts_root(&self) -> PathBuf {
        if let Some(dir) = &self.artifacts_dir {
            return dir.clone();
        }
        match env::var_os("BASALT_ARTIFACTS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::temp_dir().join("basalt-artifacts"),
        }
    }
}

/// Fluent builder for a [`Cluster`].
///
/// Validation happens once, at [`ClusterBuilder::build`]; nothing is
/// launched until [`Cluster::start`].
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    name: String,
    masters: usize,
    workers: usize,
    coordination_enabled: bool,
    ensemble_size: usize,
    properties: BTreeMap<String, String>,
    master_binary: Option<PathBuf>,
    worker_binary: Option<PathBuf>,
    coordinator_binary: Option<PathBuf>,
    ready_timeout: Duration,
    grace_period: Duration,
    artifacts_dir: Option<PathBuf>,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            masters: 1,
            workers: 0,
            coordination_enabled: false,
            ensemble_size: DEFAULT_ENSEMBLE_SIZE,
            properties: BTreeMap::new(),
            master_binary: None,
            worker_binary: None,
            coordinator_binary: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            artifacts_dir: None,
        }
    }
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster name; namespaces working directories and artifacts.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of master processes (must be >= 1).
    pub fn masters(mut self, count: usize) -> Self {
        self.masters = count;
        self
    }

    /// Number of worker processes.
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    /// Enables the coordination ensemble for master leader election.
    pub fn coordination(mut self, enabled: bool) -> Self {
        self.coordination_enabled = enabled;
        self
    }

    /// Coordination-ensemble size (default 3).
    pub fn ensemble_size(mut self, size: usize) -> Self {
        self.ensemble_size = size;
        self
    }

    /// Adds a configuration override applied to every launched node.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Master binary path (default: `$BASALT_MASTER_BIN` or
    /// `basalt-master` on `PATH`).
    pub fn master_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.master_binary = Some(path.into());
        self
    }

    /// Worker binary path (default: `$BASALT_WORKER_BIN` or
    /// `basalt-worker` on `PATH`).
    pub fn worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(path.into());
        self
    }

    /// Coordination-member binary path (default:
    /// `$BASALT_COORDINATOR_BIN` or `basalt-coordinator` on `PATH`).
    pub fn coordinator_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.coordinator_binary = Some(path.into());
        self
    }

    /// Deadline for `start` to reach readiness (default 60s).
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Grace period before a graceful terminate escalates (default 5s).
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Overrides where diagnostics archives land.
    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    /// Validates the topology and constructs an unstarted [`Cluster`].
    pub fn build(self) -> Result<Cluster> {
        if self.name.is_empty()
            || self
                .name
                .contains(|c: char| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(ClusterError::InvalidSpec(format!(
                "cluster name must be non-empty and path-safe: {:?}",
                self.name
            )));
        }
        if self.masters == 0 {
            return Err(ClusterError::InvalidSpec(
                "master count must be >= 1".to_string(),
            ));
        }
        if self.coordination_enabled && self.ensemble_size == 0 {
            return Err(ClusterError::InvalidSpec(
                "ensemble size must be >= 1".to_string(),
            ));
        }

        let spec = ClusterSpec {
            name: self.name,
            masters: self.masters,
            workers: self.workers,
            coordination_enabled: self.coordination_enabled,
            ensemble_size: self.ensemble_size,
            properties: self.properties,
            master_binary: self
                .master_binary
                .unwrap_or_else(|| binary_default("BASALT_MASTER_BIN", "basalt-master")),
            worker_binary: self
                .worker_binary
                .unwrap_or_else(|| binary_default("BASALT_WORKER_BIN", "basalt-worker")),
            coordinator_binary: self
                .coordinator_binary
                .unwrap_or_else(|| binary_default("BASALT_COORDINATOR_BIN", "basalt-coordinator")),
            ready_timeout: self.ready_timeout,
            grace_period: self.grace_period,
            artifacts_dir: self.artifacts_dir,
        };
        Ok(Cluster::from_spec(spec))
    }
}

fn binary_default(env_var: &str, fallback: &str) -> PathBuf {
    match env::var_os(env_var) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ClusterStatus;

    #[test]
    fn build_validates_master_count() {
        let err = ClusterBuilder::new().masters(0).build().unwrap_err();
        assert!(matches!(err, ClusterError::InvalidSpec(_)));
    }

    #[test]
    fn build_rejects_unsafe_names() {
        for name in ["", "a b", "a/b"] {
            let err = ClusterBuilder::new().name(name).build().unwrap_err();
            assert!(matches!(err, ClusterError::InvalidSpec(_)), "name {name:?}");
        }
    }

    #[test]
    fn build_rejects_empty_ensemble() {
        let err = ClusterBuilder::new()
            .coordination(true)
            .ensemble_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidSpec(_)));
    }

    #[test]
    fn build_does_not_launch() {
        let mut cluster = ClusterBuilder::new()
            .name("unstarted")
            .masters(2)
            .workers(3)
            .coordination(true)
            .property("key", "value")
            .build()
            .unwrap();
        assert_eq!(cluster.status(), ClusterStatus::Unstarted);
        assert!(cluster.nodes().is_empty());

        let spec = cluster.spec();
        assert_eq!(spec.masters, 2);
        assert_eq!(spec.workers, 3);
        assert!(spec.coordination_enabled);
        assert_eq!(spec.properties.get("key").unwrap(), "value");
    }
}
