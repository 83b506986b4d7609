//! Remote execution channel.
//!
//! The management endpoint only exposes a restricted operator shell, so a
//! command cannot be passed to `ssh` directly. [`SshTransport::connect`]
//! authenticates once and keeps an OpenSSH control master alive for the
//! session. [`SshSession::run_as_privileged`] opens a channel on that master
//! that runs the elevation command. It then writes the target command and an
//! `exit` into the elevated shell's input and waits for the channel to close.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::descriptor::{ConnectionDescriptor, Credential};
use super::error::ChannelError;
use super::path::expand_tilde;
use super::runner::{CommandRunner, Invocation};

/// Exit status reported when the endpoint could not say how a command ended.
pub const INDETERMINATE_EXIT_STATUS: i32 = -1;

/// Status the OpenSSH client uses for its own transport failures.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Elevation command of the restricted operator shell.
pub const DEFAULT_ELEVATION_COMMAND: &str = "ioscli oem_setup_env";

/// Instruction that leaves the elevated shell.
const SHELL_EXIT: &str = "exit";

/// Output of one remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandResult {
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Definite exit status.
    pub exit_status: i32,
}

impl CommandResult {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    /// Standard output as UTF-8, lossily.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as UTF-8, lossily.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Client-side settings shared by the execution and transfer channels.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used for password credentials.
    pub sshpass_bin: String,
    /// Shell command that grants privileged execution.
    pub elevation_command: String,
    /// Whether to verify host keys.
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    pub known_hosts_file: String,
    /// Seconds to wait for the TCP connection.
    pub connect_timeout_secs: u32,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            sshpass_bin: String::from("sshpass"),
            elevation_command: String::from(DEFAULT_ELEVATION_COMMAND),
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            connect_timeout_secs: 30,
        }
    }
}

impl SshOptions {
    /// Options every OpenSSH client invocation carries, port excluded.
    pub(crate) fn common_args(&self, credential: &Credential) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={}", self.connect_timeout_secs)),
        ];

        match credential {
            Credential::IdentityFile(path) => {
                args.push(OsString::from("-i"));
                args.push(OsString::from(expand_tilde(path)));
                args.push(OsString::from("-o"));
                args.push(OsString::from("BatchMode=yes"));
            }
            Credential::Password(_) => {
                args.push(OsString::from("-o"));
                args.push(OsString::from("BatchMode=no"));
                args.push(OsString::from("-o"));
                args.push(OsString::from(
                    "PreferredAuthentications=password,keyboard-interactive",
                ));
            }
            Credential::Agent => {
                args.push(OsString::from("-o"));
                args.push(OsString::from("BatchMode=yes"));
            }
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args
    }

    /// Starts an invocation of `program`, wrapped in `sshpass` when the
    /// credential is a password. The password travels in the environment,
    /// never on the command line.
    pub(crate) fn client_invocation(&self, program: &str, credential: &Credential) -> Invocation {
        match credential {
            Credential::Password(password) => Invocation::new(&self.sshpass_bin)
                .arg("-e")
                .arg(program)
                .env("SSHPASS", password.as_str()),
            Credential::IdentityFile(_) | Credential::Agent => Invocation::new(program),
        }
    }
}

/// Opens authenticated sessions against management endpoints.
#[derive(Clone, Debug)]
pub struct SshTransport<R> {
    options: SshOptions,
    runner: R,
}

impl<R: CommandRunner> SshTransport<R> {
    /// Creates a transport using `runner` to drive the `ssh` client.
    #[must_use]
    pub const fn new(options: SshOptions, runner: R) -> Self {
        Self { options, runner }
    }

    /// Client settings.
    #[must_use]
    pub const fn options(&self) -> &SshOptions {
        &self.options
    }

    pub(crate) const fn runner(&self) -> &R {
        &self.runner
    }

    /// Authenticates against `descriptor` and returns a session ready to run
    /// commands. Connection attempts are never retried here.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] for any failure, whatever
    /// its cause.
    pub fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<SshSession<'_, R>, ChannelError> {
        let failed = |reason: String| connection_failed(descriptor, reason);

        let control_dir = tempfile::Builder::new()
            .prefix("virtplane-ssh-")
            .tempdir()
            .map_err(|err| failed(format!("cannot create control directory: {err}")))?;
        let control_path = Utf8PathBuf::from_path_buf(control_dir.path().join("master"))
            .map_err(|path| failed(format!("non UTF-8 control path {}", path.display())))?;

        let invocation = self
            .options
            .client_invocation(&self.options.ssh_bin, descriptor.credential())
            .args(self.options.common_args(descriptor.credential()))
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes", "-f", "-N"])
            .arg("-S")
            .arg(control_path.as_str())
            .arg("-p")
            .arg(descriptor.port().to_string())
            .arg(descriptor.target())
            .detached();

        debug!(host = %descriptor.host(), port = descriptor.port(), "opening management session");
        let output = self
            .runner
            .run(&invocation)
            .map_err(|err| failed(err.to_string()))?;
        if !output.is_success() {
            let status = output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string());
            return Err(failed(format!("ssh exited with status {status}")));
        }

        Ok(SshSession {
            transport: self,
            descriptor: descriptor.clone(),
            control_path,
            _control_dir: control_dir,
            open: true,
        })
    }
}

/// One authenticated session. It serves one command at a time and is closed
/// on drop.
#[derive(Debug)]
pub struct SshSession<'a, R: CommandRunner> {
    transport: &'a SshTransport<R>,
    descriptor: ConnectionDescriptor,
    control_path: Utf8PathBuf,
    _control_dir: TempDir,
    open: bool,
}

impl<R: CommandRunner> SshSession<'_, R> {
    /// Endpoint this session is connected to.
    #[must_use]
    pub const fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Control socket multiplexing further clients over this session.
    pub(crate) fn control_path(&self) -> &Utf8Path {
        &self.control_path
    }

    /// Runs `command` in the elevated shell and captures its output.
    ///
    /// With `check_exit_code` set, a non-zero status is an error; otherwise
    /// it is returned for the caller to interpret.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ConnectionFailed`] when the session is closed or the
    ///   client reports a transport failure.
    /// - [`ChannelError::Indeterminate`] when no definite status was reported.
    /// - [`ChannelError::Execution`] for a checked non-zero status.
    pub fn run_as_privileged(
        &mut self,
        command: &str,
        check_exit_code: bool,
    ) -> Result<CommandResult, ChannelError> {
        if !self.open {
            return Err(connection_failed(
                &self.descriptor,
                String::from("session already closed"),
            ));
        }

        debug!(host = %self.descriptor.host(), command = %command, "running command as root");
        let invocation = self.channel_invocation(command);
        let output = self
            .transport
            .runner
            .run(&invocation)
            .map_err(|err| connection_failed(&self.descriptor, err.to_string()))?;

        let exit_status = output.code.unwrap_or(INDETERMINATE_EXIT_STATUS);
        let result = CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status,
        };
        classify(&self.descriptor, command, result, check_exit_code)
    }

    /// Closes the control master. Dropping the session does the same.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn channel_invocation(&self, command: &str) -> Invocation {
        let options = &self.transport.options;
        Invocation::new(&options.ssh_bin)
            .args(options.common_args(&Credential::Agent))
            .args(["-o", "ControlMaster=no", "-S"])
            .arg(self.control_path.as_str())
            .arg("-p")
            .arg(self.descriptor.port().to_string())
            .arg("-T")
            .arg(self.descriptor.target())
            .arg(&options.elevation_command)
            .stdin(format!("{command}\n{SHELL_EXIT}\n"))
    }

    fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let options = &self.transport.options;
        let invocation = Invocation::new(&options.ssh_bin)
            .arg("-S")
            .arg(self.control_path.as_str())
            .args(["-O", "exit"])
            .arg(self.descriptor.target())
            .detached();
        match self.transport.runner.run(&invocation) {
            Ok(output) if output.is_success() => {
                debug!(host = %self.descriptor.host(), "management session closed");
            }
            Ok(output) => warn!(
                host = %self.descriptor.host(),
                status = ?output.code,
                "control master did not acknowledge exit"
            ),
            Err(err) => warn!(host = %self.descriptor.host(), error = %err, "failed to close session"),
        }
    }
}

impl<R: CommandRunner> Drop for SshSession<'_, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turns a raw result into the channel's verdict.
fn classify(
    descriptor: &ConnectionDescriptor,
    command: &str,
    result: CommandResult,
    check_exit_code: bool,
) -> Result<CommandResult, ChannelError> {
    match result.exit_status {
        INDETERMINATE_EXIT_STATUS => Err(ChannelError::Indeterminate {
            command: command.to_owned(),
            stdout: result.stdout_text(),
            stderr: result.stderr_text(),
        }),
        SSH_TRANSPORT_FAILURE => Err(connection_failed(
            descriptor,
            format!(
                "channel lost while running `{command}`: {}",
                result.stderr_text().trim()
            ),
        )),
        0 => {
            debug!(command = %command, "command succeeded");
            Ok(result)
        }
        status if check_exit_code => Err(ChannelError::Execution {
            exit_code: status,
            stdout: result.stdout_text(),
            stderr: result.stderr_text(),
            command: command.to_owned(),
        }),
        status => {
            debug!(command = %command, status, "command returned unchecked status");
            Ok(result)
        }
    }
}

fn connection_failed(descriptor: &ConnectionDescriptor, reason: String) -> ChannelError {
    ChannelError::ConnectionFailed {
        host: descriptor.host().to_owned(),
        port: descriptor.port(),
        reason,
    }
}
