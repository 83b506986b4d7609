//! File transfer channel.
//!
//! Each transfer authenticates its own session through [`SshTransport`] and
//! drives `sftp` in batch mode over it, so the stricter non-interactive
//! client never needs the credential itself. Transfers move exactly one
//! file and never retry.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, warn};

use super::descriptor::{ConnectionDescriptor, Credential};
use super::error::ChannelError;
use super::exec::{SshOptions, SshTransport};
use super::path::split_remote;
use super::runner::{CommandRunner, Invocation};
use crate::driver::TransferDirection;

/// Settings for the `sftp` client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SftpOptions {
    /// Path to the `sftp` executable.
    pub sftp_bin: String,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            sftp_bin: String::from("sftp"),
        }
    }
}

/// Moves single files between the local host and a management endpoint.
#[derive(Clone, Debug)]
pub struct SftpTransfer<R> {
    transport: SshTransport<R>,
    options: SftpOptions,
}

impl<R: CommandRunner> SftpTransfer<R> {
    /// Creates a transfer channel sharing the session settings in
    /// `ssh_options`.
    #[must_use]
    pub const fn new(ssh_options: SshOptions, options: SftpOptions, runner: R) -> Self {
        Self {
            transport: SshTransport::new(ssh_options, runner),
            options,
        }
    }

    /// Uploads `local` into `remote_dir`, keeping its file name.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FileTransferFailed`] with direction `PUT`,
    /// the local path and the remote directory, whatever went wrong.
    pub fn put(
        &self,
        descriptor: &ConnectionDescriptor,
        local: &Utf8Path,
        remote_dir: &str,
    ) -> Result<(), ChannelError> {
        let failed = || ChannelError::FileTransferFailed {
            direction: TransferDirection::Put,
            source_path: local.to_string(),
            dest_path: remote_dir.to_owned(),
        };

        let Some(file_name) = local.file_name() else {
            warn!(local = %local, "upload source has no file name");
            return Err(failed());
        };
        if let Err(err) = ensure_local_file(local) {
            warn!(local = %local, error = %err, "upload source is not readable");
            return Err(failed());
        }

        let batch = format!(
            "cd {}\nput {} {}\nbye\n",
            quote(remote_dir),
            quote(local.as_str()),
            quote(file_name),
        );
        self.run_batch(descriptor, batch)
            .map_err(|reason| {
                warn!(local = %local, remote_dir, reason = %reason, "upload failed");
                failed()
            })?;
        debug!(local = %local, remote_dir, "upload complete");
        Ok(())
    }

    /// Downloads `remote_path` to `local`, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FileTransferFailed`] with direction `GET`,
    /// the remote path and the local path, whatever went wrong.
    pub fn get(
        &self,
        descriptor: &ConnectionDescriptor,
        remote_path: &str,
        local: &Utf8Path,
    ) -> Result<(), ChannelError> {
        let failed = || ChannelError::FileTransferFailed {
            direction: TransferDirection::Get,
            source_path: remote_path.to_owned(),
            dest_path: local.to_string(),
        };

        if let Err(err) = ensure_local_parent(local) {
            warn!(local = %local, error = %err, "cannot prepare download destination");
            return Err(failed());
        }

        let (remote_dir, name) = split_remote(remote_path);
        let batch = format!(
            "cd {}\nget {} {}\nbye\n",
            quote(remote_dir),
            quote(name),
            quote(local.as_str()),
        );
        self.run_batch(descriptor, batch)
            .map_err(|reason| {
                warn!(remote_path, local = %local, reason = %reason, "download failed");
                failed()
            })?;
        debug!(remote_path, local = %local, "download complete");
        Ok(())
    }

    fn run_batch(&self, descriptor: &ConnectionDescriptor, batch: String) -> Result<(), String> {
        let session = self
            .transport
            .connect(descriptor)
            .map_err(|err| err.to_string())?;

        let invocation = Invocation::new(&self.options.sftp_bin)
            .args(self.transport.options().common_args(&Credential::Agent))
            .arg("-o")
            .arg(format!("ControlPath={}", session.control_path()))
            .args(["-o", "ControlMaster=no", "-b", "-", "-P"])
            .arg(descriptor.port().to_string())
            .arg(descriptor.target())
            .stdin(batch);

        let output = self
            .transport
            .runner()
            .run(&invocation)
            .map_err(|err| err.to_string())?;
        session.close();

        if output.is_success() {
            Ok(())
        } else {
            Err(format!(
                "sftp exited with status {:?}: {}",
                output.code,
                output.stderr_text()
            ))
        }
    }
}

/// Quotes a path for the `sftp` batch parser.
fn quote(path: &str) -> String {
    let escaped = path.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn split_local(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{path} has no file name"))
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Ok((parent, file_name))
}

fn ensure_local_file(path: &Utf8Path) -> io::Result<()> {
    let (parent, file_name) = split_local(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    if dir.metadata(file_name)?.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} is not a regular file"),
        ))
    }
}

fn ensure_local_parent(path: &Utf8Path) -> io::Result<()> {
    let (parent, _) = split_local(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
}

#[cfg(test)]
mod tests {
    use super::quote;
    use rstest::rstest;

    #[rstest]
    #[case("/home/padmin", "\"/home/padmin\"")]
    #[case("with space", "\"with space\"")]
    #[case("odd\"name", "\"odd\\\"name\"")]
    #[case("back\\slash", "\"back\\\\slash\"")]
    fn quote_escapes_batch_metacharacters(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(quote(raw), expected);
    }
}
