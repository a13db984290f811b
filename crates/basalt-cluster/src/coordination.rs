//! Optional coordination-service ensemble for master leader election.
//!
//! The ensemble is started before any master and stopped only after all
//! masters are down, because masters hold an active session with it for
//! as long as they run. The consensus protocol itself is opaque here; the
//! adapter only launches the member processes and derives the connection
//! string injected into master configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::allocator::ResourceAllocator;
use crate::config::{NodeConfig, Role};
use crate::error::Result;
use crate::node::NodeHandle;
use crate::spec::ClusterSpec;

/// A supervised coordination ensemble.
#[derive(Debug)]
pub struct CoordinationEnsemble {
    connection_string: String,
    pending: Vec<(NodeConfig, PathBuf)>,
    members: Vec<NodeHandle>,
}

impl CoordinationEnsemble {
    /// Allocates ports and directories for every member and derives the
    /// connection string. Nothing is launched yet.
    pub(crate) fn allocate(allocator: &mut ResourceAllocator, spec: &ClusterSpec) -> Result<Self> {
        let mut resources = Vec::with_capacity(spec.ensemble_size);
        for ordinal in 0..spec.ensemble_size {
            resources.push(allocator.allocate(Role::Coordinator, ordinal)?);
        }
        let connection_string = resources
            .iter()
            .map(|res| format!("127.0.0.1:{}", res.service_port))
            .collect::<Vec<_>>()
            .join(",");

        let pending = resources
            .into_iter()
            .enumerate()
            .map(|(ordinal, res)| {
                let config = NodeConfig {
                    role: Role::Coordinator,
                    ordinal,
                    bind_address: "127.0.0.1".to_string(),
                    service_port: res.service_port,
                    aux_port: res.aux_port,
                    masters: vec![],
                    coordination: Some(connection_string.clone()),
                    election_enabled: false,
                    properties: spec.properties.clone(),
                };
                (config, res.dir)
            })
            .collect();

        Ok(Self {
            connection_string,
            pending,
            members: vec![],
        })
    }

    /// Launches every allocated member. A launch failure is fatal to
    /// cluster startup and propagates; members launched before the failure
    /// stay registered so teardown and diagnostics still reach them.
    pub(crate) fn launch(&mut self, binary: &Path) -> Result<()> {
        for (config, dir) in self.pending.drain(..) {
            self.members.push(NodeHandle::launch(binary, config, dir)?);
        }
        tracing::info!(
            connection_string = %self.connection_string,
            members = self.members.len(),
            "coordination ensemble running"
        );
        Ok(())
    }

    /// Comma-joined `host:port` list handed to masters.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Terminates every member, best-effort.
    pub(crate) async fn stop(&mut self, grace: Duration) {
        for member in &mut self.members {
            if let Err(err) = member.terminate(true, grace).await {
                tracing::warn!(
                    ordinal = member.config.ordinal,
                    error = %err,
                    "ignoring coordination member teardown failure"
                );
            }
        }
    }

    pub(crate) fn members_mut(&mut self) -> &mut [NodeHandle] {
        &mut self.members
    }

    pub(crate) fn members(&self) -> &[NodeHandle] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ClusterBuilder;
    use tempfile::TempDir;

    #[test]
    fn allocate_derives_connection_string_without_launching() {
        let temp = TempDir::new().unwrap();
        let mut allocator = ResourceAllocator::new(temp.path().to_path_buf());
        let cluster = ClusterBuilder::new()
            .coordination(true)
            .ensemble_size(3)
            .build()
            .unwrap();

        let ensemble = CoordinationEnsemble::allocate(&mut allocator, cluster.spec()).unwrap();
        assert!(ensemble.members().is_empty());

        let parts: Vec<&str> = ensemble.connection_string().split(',').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            assert!(part.starts_with("127.0.0.1:"), "bad member addr {part}");
        }
        for ordinal in 0..3 {
            assert!(temp.path().join(format!("coordinator-{ordinal}")).is_dir());
        }
    }
}
