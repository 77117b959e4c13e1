//! Error types for node lifecycle management.
//!
//! The lifecycle machine itself never fails: host failures are recorded on the
//! node. These errors cover registry lookups and invalid transitions.

use thiserror::Error;

use crate::types::LifecycleState;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in node lifecycle operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested node was not found.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A node with the same name is already registered.
    #[error("node already registered: {0}")]
    NodeExists(String),

    /// The requested state transition is not valid.
    #[error("invalid state transition for node {name}: cannot transition from {from:?} to {to:?}")]
    InvalidState {
        /// The node being transitioned.
        name: String,
        /// The current state.
        from: LifecycleState,
        /// The requested target state.
        to: LifecycleState,
    },
}
