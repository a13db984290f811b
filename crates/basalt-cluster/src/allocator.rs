//! Non-conflicting port and directory allocation.
//!
//! Ports are drawn from the kernel's ephemeral range by binding a
//! `127.0.0.1:0` listener and recording the assigned port; the listener is
//! dropped immediately, so the reservation is best-effort and a bounded
//! retry loop covers races with concurrent test runs. Directories are
//! created fresh under the cluster-scoped root, named `<role>-<ordinal>`
//! so diagnostics snapshots stay traceable.

use std::collections::HashSet;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;

use crate::config::Role;
use crate::error::{ClusterError, Result};

/// Attempts before giving up on finding an unclaimed port.
const MAX_PORT_ATTEMPTS: u32 = 64;

/// Runtime resources assigned to one node.
#[derive(Debug, Clone)]
pub struct NodeResources {
    /// Primary service port.
    pub service_port: u16,

    /// Secondary port.
    pub aux_port: u16,

    /// Fresh working directory for this node.
    pub dir: PathBuf,
}

/// Hands out non-conflicting ports and working directories under one
/// cluster-scoped root.
#[derive(Debug)]
pub struct ResourceAllocator {
    root: PathBuf,
    claimed: HashSet<u16>,
}

impl ResourceAllocator {
    /// Creates an allocator scoped to `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            claimed: HashSet::new(),
        }
    }

    /// Allocates a port pair and a fresh working directory for one node.
    pub fn allocate(&mut self, role: Role, ordinal: usize) -> Result<NodeResources> {
        let dir = self.root.join(format!("{role}-{ordinal}"));
        fs::create_dir_all(&dir)?;

        let service_port = self.reserve_port()?;
        let aux_port = self.reserve_port()?;
        tracing::debug!(
            role = %role,
            ordinal,
            service_port,
            aux_port,
            dir = %dir.display(),
            "allocated node resources"
        );

        Ok(NodeResources {
            service_port,
            aux_port,
            dir,
        })
    }

    /// Reserves an ephemeral port not yet claimed within this cluster.
    fn reserve_port(&mut self) -> Result<u16> {
        for _ in 0..MAX_PORT_ATTEMPTS {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let port = listener.local_addr()?.port();
            drop(listener);
            if self.claimed.insert(port) {
                return Ok(port);
            }
        }
        Err(ClusterError::ResourceExhausted {
            what: "free tcp port".to_string(),
            attempts: MAX_PORT_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn allocations_are_pairwise_distinct() {
        let temp = TempDir::new().unwrap();
        let mut allocator = ResourceAllocator::new(temp.path().to_path_buf());

        let mut ports = HashSet::new();
        let mut dirs = HashSet::new();
        for ordinal in 0..3 {
            for role in [Role::Master, Role::Worker] {
                let res = allocator.allocate(role, ordinal).unwrap();
                assert!(ports.insert(res.service_port));
                assert!(ports.insert(res.aux_port));
                assert!(dirs.insert(res.dir.clone()));
                assert!(res.dir.is_dir());
            }
        }
    }

    #[test]
    fn directories_are_deterministic_and_under_root() {
        let temp = TempDir::new().unwrap();
        let mut allocator = ResourceAllocator::new(temp.path().to_path_buf());

        let res = allocator.allocate(Role::Master, 2).unwrap();
        assert_eq!(res.dir, temp.path().join("master-2"));
    }
}
