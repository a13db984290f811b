//! Multi-process test cluster orchestration for Basalt.
//!
//! Provisions, starts, supervises, and tears down a real multi-process
//! deployment so integration tests exercise actual OS processes instead of
//! an in-process simulation:
//! - Non-conflicting port/directory allocation per node
//! - Process supervision with captured logs and forced-kill escalation
//! - Optional coordination ensemble for master leader election
//! - Readiness probing with a bounded deadline
//! - Diagnostics snapshots and leak-free, idempotent teardown
//!
//! ```no_run
//! # async fn example() -> basalt_cluster::Result<()> {
//! use basalt_cluster::Cluster;
//!
//! let mut cluster = Cluster::builder()
//!     .name("simple")
//!     .masters(1)
//!     .workers(1)
//!     .build()?;
//! cluster.start().await?;
//! let fs = cluster.client_handle()?.fs_client();
//! // ... exercise the cluster ...
//! cluster.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod controller;
pub mod coordination;
pub mod diagnostics;
pub mod error;
pub mod node;
pub mod probe;
pub mod spec;

pub use allocator::{NodeResources, ResourceAllocator};
pub use config::{NodeConfig, Role};
pub use controller::{ClientHandle, Cluster, ClusterStatus, NodeView};
pub use coordination::CoordinationEnsemble;
pub use error::{ClusterError, Result};
pub use node::{NodeHandle, NodeStatus};
pub use spec::{ClusterBuilder, ClusterSpec};
