//! Minimal filesystem client for a Basalt test cluster.
//!
//! Speaks the line-oriented wire protocol of a Basalt master:
//! - Readiness probing ([`FsClient::ping`])
//! - File operations ([`FsClient::create_file`], [`FsClient::open_file`],
//!   [`FsClient::exists`], [`FsClient::delete`])
//! - Bounded retry for worker-registration lag ([`retry::until_deadline`])
//!
//! A cluster reporting ready only guarantees that masters are reachable;
//! worker registration is asynchronous, so operations that need a worker
//! (such as `create_file`) may fail transiently right after startup.
//! Callers are expected to wrap those in [`retry::until_deadline`].

pub mod error;
pub mod fs;
pub mod retry;

pub use error::{ClientError, Result};
pub use fs::{CreateOptions, FileReader, FsClient};
pub use retry::RetryPolicy;
