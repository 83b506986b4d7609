//! Local process abstraction the channels use to drive the OpenSSH tools.
//!
//! Channels describe what to run as an [`Invocation`]; a [`CommandRunner`]
//! executes it. Tests substitute a scripted runner so no real session is
//! ever opened.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use super::error::SpawnError;

/// A local program together with its arguments, environment and input.
#[derive(Clone, Eq, PartialEq)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables; values may hold secrets.
    pub env: Vec<(String, String)>,
    /// Bytes written to standard input before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Whether standard output and error are captured. Programs that leave a
    /// background process behind must not capture, or the pipes never close.
    pub capture_output: bool,
}

impl Invocation {
    /// Starts an invocation of `program` that captures its output.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            capture_output: true,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the bytes fed to standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Discards output instead of capturing it.
    #[must_use]
    pub const fn detached(mut self) -> Self {
        self.capture_output = false;
        self
    }

    /// Shell-like rendering for logs and assertions; environment values are
    /// never included.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Standard input rendered as UTF-8, lossily.
    #[must_use]
    pub fn stdin_text(&self) -> String {
        self.stdin
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("stdin_len", &self.stdin.as_ref().map(Vec::len))
            .field("capture_output", &self.capture_output)
            .finish()
    }
}

/// Result of running a local program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, or `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard error as trimmed UTF-8, lossily.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }
}

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `invocation` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if the program cannot be started.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, SpawnError>;
}

/// Runner that spawns real processes on the local host.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, SpawnError> {
        let spawn_error = |err: std::io::Error| SpawnError {
            program: invocation.program.clone(),
            message: err.to_string(),
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if invocation.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command.spawn().map_err(spawn_error)?;
        let writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut pipe), Some(bytes)) => Some(thread::spawn(move || {
                pipe.write_all(&bytes)?;
                pipe.flush()
            })),
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;
        if let Some(handle) = writer
            && let Ok(Err(err)) = handle.join()
        {
            // The remote side may exit before consuming all input.
            debug!(program = %invocation.program, error = %err, "stdin closed early");
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
