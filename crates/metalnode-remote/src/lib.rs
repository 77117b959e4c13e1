//! Concurrent remote execution over SSH for metalnode.
//!
//! This crate pushes files to and runs shell commands on many hosts at once.
//! Each host gets its own session and worker; failures stay with the host
//! they happened on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       FleetExecutor                          │
//! │   one task per host ──► mpsc queue ──► single-writer merge   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HostJobRunner                          │
//! │   open ─► uploads ─► commands ─► close (always, once)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Transport / Session (SSH + SFTP)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use metalnode_core::{CommandBatch, Host};
//! use metalnode_remote::{BatchExecutor, FleetExecutor, SshConfig, SshTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(SshTransport::new(SshConfig::default()));
//! let executor = FleetExecutor::with_defaults(transport);
//!
//! let hosts = vec![Host::with_password("root", "10.0.0.5", 22, "secret")];
//! let batch = CommandBatch::new()
//!     .upload("setup.sh", "/tmp")
//!     .command("chmod +x /tmp/setup.sh")
//!     .command("/tmp/setup.sh");
//!
//! let result = executor.run(&hosts, &batch).await?;
//! for (address, outcome) in result.iter() {
//!     println!("{address}: {:?}", outcome.diagnostic().lines());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to use [`MockTransport`], which scripts
//! per-host command behaviour and records uploads and session counts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fleet;
pub mod runner;
pub mod ssh;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{ErrorKind, RemoteError, Result};
pub use fleet::{BatchExecutor, FleetExecutor};
pub use runner::HostJobRunner;
pub use ssh::{SshSession, SshTransport};
pub use transport::{CommandOutput, Session, Transport};
pub use types::{ExecutorConfig, FleetResult, HostOutcome, SshConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockCommand, MockTransport};
