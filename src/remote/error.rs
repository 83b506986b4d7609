//! Errors raised by the execution and transfer channels.

use thiserror::Error;

use crate::driver::TransferDirection;

/// Channel-level failures. The driver layer converts each variant into the
/// matching [`DriverError`](crate::driver::DriverError).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// The session could not be established or was lost.
    #[error("connection to {host}:{port} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint host.
        host: String,
        /// Endpoint port.
        port: u16,
        /// Human readable cause.
        reason: String,
    },
    /// A checked command finished with a non-zero status.
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
    /// The endpoint did not report a definite exit status.
    #[error("command `{command}` finished without a definite exit status")]
    Indeterminate {
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
}

/// Raised when a local helper program cannot be started.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to spawn {program}: {message}")]
pub struct SpawnError {
    /// Program that failed to start.
    pub program: String,
    /// Operating system error string.
    pub message: String,
}
