//! Common error types for metalnode.
//!
//! Every variant here describes a malformed host descriptor and is detected
//! before any network I/O takes place.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Configuration errors found while validating a [`crate::Host`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The SSH user is empty.
    #[error("host user is required")]
    MissingUser,

    /// Neither a password nor a private key was supplied.
    #[error("at least one of password or private key is required for {0}")]
    MissingCredentials(String),

    /// The address is empty.
    #[error("host address is required")]
    MissingAddress,

    /// The address is not an IPv4 or IPv6 literal.
    #[error("host address {0:?} is not a valid IP address")]
    InvalidAddress(String),

    /// The port is zero.
    #[error("port for {0} must be greater than zero")]
    InvalidPort(String),
}
