//! Binary entry point for the virtplane operator CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use serde::Serialize;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use virtplane::{
    ChannelError, CommandRunner, ConfigError, Driver, DriverError, ProcessCommandRunner,
    RemoteConfig, RemoteDriver, SftpTransfer, SshTransport,
};

mod cli;

use cli::{Cli, ExecCommand, GetCommand, PutCommand, ResourcesCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    /// Remote status for failed checked commands, `1` otherwise.
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Channel(ChannelError::Execution { exit_code, .. })
            | Self::Driver(DriverError::Execution { exit_code, .. }) => *exit_code,
            _ => 1,
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32, CliError> {
    let config = RemoteConfig::load_without_cli_args()?;
    dispatch(
        cli,
        &config,
        ProcessCommandRunner,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )
}

fn dispatch<R>(
    cli: Cli,
    config: &RemoteConfig,
    runner: R,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<i32, CliError>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    match cli {
        Cli::Exec(args) => exec_remote(config, runner, &args, out, err),
        Cli::Put(args) => put_file(config, runner, &args),
        Cli::Get(args) => get_file(config, runner, &args),
        Cli::Resources(args) => {
            let driver = RemoteDriver::from_config(config, runner)?;
            write_json(out, &driver.get_available_resource(&args.node)?)
        }
        Cli::HostStats => {
            let driver = RemoteDriver::from_config(config, runner)?;
            write_json(out, &driver.get_host_stats(true)?)
        }
    }
}

fn exec_remote<R: CommandRunner>(
    config: &RemoteConfig,
    runner: R,
    args: &ExecCommand,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let command = render_remote_command(&args.command);
    let descriptor = config.descriptor()?;
    let transport = SshTransport::new(config.ssh_options(), runner);

    let mut session = transport.connect(&descriptor)?;
    let outcome = session.run_as_privileged(&command, !args.no_check);
    session.close();

    let result = match outcome {
        Ok(result) => result,
        Err(failure) => {
            if let ChannelError::Execution { stdout, .. } = &failure {
                out.write_all(stdout.as_bytes())?;
            }
            return Err(failure.into());
        }
    };
    out.write_all(&result.stdout)?;
    err.write_all(&result.stderr)?;
    Ok(result.exit_status)
}

fn put_file<R: CommandRunner>(
    config: &RemoteConfig,
    runner: R,
    args: &PutCommand,
) -> Result<i32, CliError> {
    let descriptor = config.descriptor()?;
    let transfer = SftpTransfer::new(config.ssh_options(), config.sftp_options(), runner);
    transfer.put(&descriptor, Utf8Path::new(&args.local), &args.remote_dir)?;
    Ok(0)
}

fn get_file<R: CommandRunner>(
    config: &RemoteConfig,
    runner: R,
    args: &GetCommand,
) -> Result<i32, CliError> {
    let descriptor = config.descriptor()?;
    let transfer = SftpTransfer::new(config.ssh_options(), config.sftp_options(), runner);
    transfer.get(&descriptor, &args.remote, Utf8Path::new(&args.local))?;
    Ok(0)
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<i32, CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    writeln!(out, "{rendered}")?;
    Ok(0)
}

fn render_remote_command(args: &[String]) -> String {
    let mut result = String::new();
    let mut first = true;

    for arg in args {
        if first {
            first = false;
        } else {
            result.push(' ');
        }

        let escaped = escape(arg.as_str().into());
        result.push_str(escaped.as_ref());
    }

    result
}

/// Rejects arguments that would break the line-oriented elevated shell.
fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\n' | '\r' | '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
