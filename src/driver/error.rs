//! Contract-level error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::remote::ChannelError;

/// Direction of a single-file transfer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransferDirection {
    /// Local file uploaded to a remote directory.
    Put,
    /// Remote file downloaded to a local path.
    Get,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => f.write_str("PUT"),
            Self::Get => f.write_str("GET"),
        }
    }
}

/// Errors surfaced by every [`Driver`](super::Driver) implementation.
///
/// Channel failures are translated into the matching variant with the same
/// structured fields; nothing from the transport layer leaks through.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// A management session could not be established.
    #[error("connection to {host}:{port} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint host.
        host: String,
        /// Endpoint port.
        port: u16,
        /// Human readable cause.
        reason: String,
    },
    /// A checked remote command returned a non-zero status.
    #[error("command `{command}` exited with status {exit_code}: {stderr}")]
    Execution {
        /// Exit status reported by the endpoint.
        exit_code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
        /// Command as sent to the endpoint.
        command: String,
    },
    /// The remote status could not be determined.
    #[error("command `{command}` finished without a definite exit status")]
    IndeterminateExecution {
        /// Command as sent to the endpoint.
        command: String,
        /// Standard output captured before the interruption.
        stdout: String,
        /// Standard error captured before the interruption.
        stderr: String,
    },
    /// A single-file transfer failed.
    #[error("file transfer {direction} from {source_path} to {dest_path} failed")]
    FileTransferFailed {
        /// Transfer direction.
        direction: TransferDirection,
        /// Path the file was read from.
        source_path: String,
        /// Path or directory the file was written to.
        dest_path: String,
    },
    /// The named instance is not known to the backend.
    #[error("instance {name} not found")]
    InstanceNotFound {
        /// Instance name.
        name: String,
    },
    /// The named instance is not running on this backend.
    #[error("instance {name} is not running")]
    InstanceNotRunning {
        /// Instance name.
        name: String,
    },
    /// `spawn` was asked to create a name that is already registered.
    #[error("instance {name} already exists")]
    InstanceExists {
        /// Instance name.
        name: String,
    },
    /// The operation is not a legal transition from the current state.
    #[error("cannot {operation} instance {name} while {state}")]
    InvalidTransition {
        /// Instance name.
        name: String,
        /// State at the time of the request.
        state: String,
        /// Requested operation.
        operation: String,
    },
    /// This backend family deliberately does not implement the operation.
    #[error("{operation} is not supported by the {backend} backend")]
    UnsupportedOperation {
        /// Operation name.
        operation: String,
        /// Backend name.
        backend: String,
    },
    /// The node is not part of the configured node set.
    #[error("node {node} is not found")]
    UnknownNode {
        /// Requested node identifier.
        node: String,
    },
    /// The backend was constructed without any node.
    #[error("backend has no configured node")]
    NoNodesConfigured,
    /// Source and destination cannot perform the live migration.
    #[error("live migration incompatible: {reason}")]
    MigrationIncompatible {
        /// Why the compatibility check failed.
        reason: String,
    },
    /// The live-migration transfer did not complete.
    #[error("live migration of {name} failed: {reason}")]
    MigrationFailed {
        /// Instance name.
        name: String,
        /// Failure description.
        reason: String,
    },
    /// Inventory output returned by a node could not be parsed.
    #[error("failed to parse inventory for node {node}: {message}")]
    InventoryParse {
        /// Node whose output was rejected.
        node: String,
        /// Parser message.
        message: String,
    },
    /// Backend configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Convenience constructor for [`DriverError::UnsupportedOperation`].
    #[must_use]
    pub fn unsupported(operation: &str, backend: &str) -> Self {
        Self::UnsupportedOperation {
            operation: operation.to_owned(),
            backend: backend.to_owned(),
        }
    }

    /// Convenience constructor for [`DriverError::InstanceNotFound`].
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::InstanceNotFound {
            name: name.to_owned(),
        }
    }
}

impl From<ChannelError> for DriverError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::ConnectionFailed { host, port, reason } => {
                Self::ConnectionFailed { host, port, reason }
            }
            ChannelError::Execution {
                exit_code,
                stdout,
                stderr,
                command,
            } => Self::Execution {
                exit_code,
                stdout,
                stderr,
                command,
            },
            ChannelError::Indeterminate {
                command,
                stdout,
                stderr,
            } => Self::IndeterminateExecution {
                command,
                stdout,
                stderr,
            },
            ChannelError::FileTransferFailed {
                direction,
                source_path,
                dest_path,
            } => Self::FileTransferFailed {
                direction,
                source_path,
                dest_path,
            },
        }
    }
}

/// Result alias used throughout the driver contract.
pub type DriverResult<T> = Result<T, DriverError>;
