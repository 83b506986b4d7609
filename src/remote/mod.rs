//! Remote management channels.
//!
//! The endpoint is reachable only through a restricted operator shell over
//! an authenticated session. This module drives the OpenSSH client tools
//! through a [`CommandRunner`] to provide:
//!
//! - the execution channel ([`SshTransport`], [`SshSession`]), which elevates
//!   privilege and classifies exit statuses;
//! - the transfer channel ([`SftpTransfer`]), which moves one file per call;
//! - [`remote_join`] for forward-slash remote paths.

mod config;
mod descriptor;
mod error;
mod exec;
mod path;
mod runner;
mod transfer;

pub use config::{
    ConfigError, DEFAULT_REMOTE_IMAGE_DIR, DEFAULT_STAGING_DIR, DEFAULT_USERNAME, RemoteConfig,
};
pub use descriptor::{ConnectionDescriptor, Credential, DEFAULT_SSH_PORT};
pub use error::{ChannelError, SpawnError};
pub use exec::{
    CommandResult, DEFAULT_ELEVATION_COMMAND, INDETERMINATE_EXIT_STATUS, SSH_TRANSPORT_FAILURE,
    SshOptions, SshSession, SshTransport,
};
pub use path::{expand_tilde, remote_join};
pub(crate) use path::split_remote;
pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessCommandRunner};
pub use transfer::{SftpOptions, SftpTransfer};

#[cfg(test)]
mod tests;
