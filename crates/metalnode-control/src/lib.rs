//! Node initialization lifecycle for metalnode.
//!
//! This crate takes registered bare-metal nodes from `Unknown` to `Ready` by
//! running a provisioning batch and then a verification batch against each
//! node through a [`BatchExecutor`](metalnode_remote::BatchExecutor).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       NodeRegistry                           │
//! │        register / get / list / reset / reconcile             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ claim under lock
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      NodeLifecycle                           │
//! │   Initializing ─► provisioning batch ─► Checking ─►          │
//! │   verification batch ─► Ready | Failed                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               FleetExecutor (metalnode-remote)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use metalnode_control::{NodeLifecycle, NodeRecord, NodeRegistry};
//! use metalnode_core::Host;
//! use metalnode_remote::{FleetExecutor, SshConfig, SshTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(SshTransport::new(SshConfig::default()));
//! let lifecycle = NodeLifecycle::with_defaults(Arc::new(FleetExecutor::with_defaults(transport)));
//!
//! let registry = NodeRegistry::new();
//! registry.register(NodeRecord::new(
//!     "node-1",
//!     Host::with_password("root", "10.0.0.5", 22, "secret"),
//! ))?;
//!
//! let node = registry.reconcile("node-1", &lifecycle).await?;
//! println!("node-1 is {:?}", node.status.state);
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Unknown` → `Initializing` (reconcile)
//! - `Initializing` → `Checking`, or back to `Unknown` if the host is unreachable
//! - `Checking` → `Ready` or `Failed`, or back to `Unknown` if the host is unreachable
//! - `Ready`, `Failed` → `Unknown` (reset)
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod service;
pub mod types;

pub use error::{ControlError, Result};
pub use registry::NodeRegistry;
pub use service::{NodeLifecycle, NoopObserver, TransitionObserver, BENIGN_CHECK_MESSAGE};
pub use types::{LifecycleConfig, LifecycleState, NodeRecord, NodeSpec, NodeStatus};
