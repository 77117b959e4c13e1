//! Error types for remote execution.

use std::time::Duration;

use metalnode_core::CoreError;
use thiserror::Error;

/// A specialized Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Coarse classification of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed host descriptor, caught before any I/O.
    Configuration,
    /// The session could not be established.
    Connect,
    /// The server rejected the credentials.
    Auth,
    /// A file upload failed or lost data.
    Transfer,
    /// A command failed or its channel broke.
    Command,
    /// Unexpected fault inside a host job.
    Internal,
    /// The fleet request itself is malformed.
    Fleet,
}

/// Errors that can occur while talking to remote hosts.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host descriptor failed validation.
    #[error("invalid host configuration: {0}")]
    Config(#[from] CoreError),

    /// TCP connect or SSH handshake failed.
    #[error("failed to connect to {address}: {message}")]
    Connect {
        /// Target address.
        address: String,
        /// Underlying failure.
        message: String,
    },

    /// The server rejected the supplied credentials.
    #[error("authentication failed for {user}@{address}")]
    Auth {
        /// SSH user.
        user: String,
        /// Target address.
        address: String,
    },

    /// The private key material could not be decoded.
    #[error("invalid private key for {address}: {message}")]
    InvalidKey {
        /// Target address.
        address: String,
        /// Decoder failure.
        message: String,
    },

    /// The local source of an upload could not be read.
    #[error("failed to read local file {path}: {source}")]
    LocalFile {
        /// Local path.
        path: String,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The transfer source has no file name to derive a remote name from.
    #[error("cannot derive a remote file name from {0}")]
    InvalidTransfer(String),

    /// An SFTP request failed.
    #[error("sftp error on {path}: {message}")]
    Sftp {
        /// Remote path.
        path: String,
        /// Protocol failure.
        message: String,
    },

    /// Local and remote sizes differ after an upload.
    #[error("lost data when uploading {path}: expected {expected} bytes, remote has {actual}")]
    LostData {
        /// Remote path. Removal is attempted before this is returned.
        path: String,
        /// Local file size.
        expected: u64,
        /// Remote file size.
        actual: u64,
    },

    /// A command exited with a non-zero status.
    #[error("command `{command}` exited with status {status}")]
    NonZeroExit {
        /// The command line.
        command: String,
        /// Exit status reported by the server.
        status: u32,
    },

    /// The exec channel failed while running a command.
    #[error("channel error while running `{command}`: {message}")]
    Channel {
        /// The command line.
        command: String,
        /// Transport failure.
        message: String,
    },

    /// The session was used after it was closed.
    #[error("session to {0} is closed")]
    SessionClosed(String),

    /// A host job panicked.
    #[error("host job faulted: {0}")]
    Internal(String),

    /// A host job ran past its deadline.
    #[error("host job exceeded its deadline of {0:?}")]
    Timeout(Duration),

    /// The fleet contains no hosts.
    #[error("fleet is empty")]
    EmptyFleet,

    /// Two hosts in the fleet share an address.
    #[error("duplicate host in fleet: {0}")]
    DuplicateHost(String),
}

impl RemoteError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidKey { .. } => ErrorKind::Configuration,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::LocalFile { .. }
            | Self::InvalidTransfer(_)
            | Self::Sftp { .. }
            | Self::LostData { .. } => ErrorKind::Transfer,
            Self::NonZeroExit { .. } | Self::Channel { .. } | Self::SessionClosed(_) => {
                ErrorKind::Command
            }
            Self::Internal(_) | Self::Timeout(_) => ErrorKind::Internal,
            Self::EmptyFleet | Self::DuplicateHost(_) => ErrorKind::Fleet,
        }
    }

    /// Check if this error might go away on retry.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            RemoteError::Config(CoreError::MissingUser).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            RemoteError::LostData {
                path: "/tmp/a".into(),
                expected: 10,
                actual: 5
            }
            .kind(),
            ErrorKind::Transfer
        );
        assert_eq!(RemoteError::EmptyFleet.kind(), ErrorKind::Fleet);
    }

    #[test]
    fn retriable_errors() {
        assert!(RemoteError::Connect {
            address: "10.0.0.5".into(),
            message: "refused".into()
        }
        .is_retriable());
        assert!(!RemoteError::Auth {
            user: "root".into(),
            address: "10.0.0.5".into()
        }
        .is_retriable());
    }

    #[test]
    fn lost_data_message() {
        let err = RemoteError::LostData {
            path: "/tmp/setup.sh".into(),
            expected: 10,
            actual: 5,
        };
        assert!(err.to_string().starts_with("lost data when uploading /tmp/setup.sh"));
    }
}
