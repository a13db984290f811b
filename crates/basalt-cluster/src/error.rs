//! Error types for cluster orchestration.

use std::time::Duration;
use thiserror::Error;

use crate::config::Role;

/// Cluster orchestration errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid topology declaration.
    #[error("invalid cluster spec: {0}")]
    InvalidSpec(String),

    /// The allocator ran out of free ports within its attempt budget.
    #[error("resource exhausted: {what} (after {attempts} attempts)")]
    ResourceExhausted { what: String, attempts: u32 },

    /// The OS refused to start a node process.
    #[error("failed to launch {role} {ordinal} ({binary}): {source}")]
    ProcessLaunchFailed {
        role: Role,
        ordinal: usize,
        binary: String,
        source: std::io::Error,
    },

    /// The readiness deadline elapsed before the cluster became usable.
    #[error("cluster not ready after {waited:?}")]
    ClusterNotReady { waited: Duration },

    /// `start` was called more than once.
    #[error("cluster already started")]
    AlreadyStarted,

    /// A running cluster was required but the state is `{state}`.
    #[error("cluster not running (state: {state})")]
    ClusterNotRunning { state: &'static str },

    /// Operation other than `save_workdir`/`destroy` on a destroyed cluster.
    #[error("cluster destroyed")]
    ClusterDestroyed,

    /// Targeted lifecycle call named a node that does not exist.
    #[error("no {role} with ordinal {ordinal}")]
    NodeNotFound { role: Role, ordinal: usize },

    /// `start_node` on a node that is still alive.
    #[error("{role} {ordinal} is already running")]
    NodeAlreadyRunning { role: Role, ordinal: usize },

    /// Per-node config could not be serialized.
    #[error("failed to serialize node config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
