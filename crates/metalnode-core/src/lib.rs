//! Core types for metalnode.
//!
//! This crate provides the shared vocabulary used by the remote execution
//! engine and the node lifecycle:
//!
//! - [`Host`]: address, port and SSH credentials for one remote machine
//! - [`CommandBatch`] and [`FileTransfer`]: what to push to and run on a host
//! - [`Diagnostic`]: the ordered stderr evidence captured for one host

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod batch;
pub mod diagnostic;
pub mod error;
pub mod host;

pub use batch::{CommandBatch, FileTransfer};
pub use diagnostic::Diagnostic;
pub use error::{CoreError, Result};
pub use host::{Credential, Host};
