//! Client error types with a transient/fatal classification.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the Basalt client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect to a specific master.
    #[error("failed to connect to master at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// None of the known masters accepted a connection.
    #[error("no master reachable (tried {tried} address(es))")]
    NoMasterReachable { tried: usize },

    /// IO failure mid-request (connection reset, short read, ...).
    #[error("i/o error during request: {0}")]
    Io(#[from] std::io::Error),

    /// The server replied with something the protocol does not allow.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The cluster accepted the connection but cannot serve the request
    /// yet, e.g. no worker has registered with the master.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Create target already exists (possibly as a partial entry left by
    /// an earlier failed create).
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// Path not found.
    #[error("path not found: {0}")]
    NotFound(String),

    /// A retry loop exhausted its deadline.
    #[error("deadline elapsed after {attempts} attempt(s), last error: {last}")]
    DeadlineElapsed {
        attempts: u32,
        last: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether a retry loop should treat this failure as transient.
    ///
    /// Connectivity failures and `Unavailable` are expected immediately
    /// after cluster startup (workers register asynchronously) and during
    /// master failover. Everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::NoMasterReachable { .. }
                | ClientError::Io(_)
                | ClientError::Unavailable(_)
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
