//! Command-line interface definitions for the `virtplane` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `virtplane` binary.
#[derive(Debug, Parser)]
#[command(
    name = "virtplane",
    about = "Operate a partition manager through its restricted management shell",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run a command in the elevated shell of the configured host.
    #[command(name = "exec", about = "Run a command in the elevated shell")]
    Exec(ExecCommand),
    /// Upload a local file into a remote directory.
    #[command(name = "put", about = "Upload a local file into a remote directory")]
    Put(PutCommand),
    /// Download a remote file to a local path.
    #[command(name = "get", about = "Download a remote file to a local path")]
    Get(GetCommand),
    /// Print the resource-capacity record of one node as JSON.
    #[command(name = "resources", about = "Print the capacity of one node as JSON")]
    Resources(ResourcesCommand),
    /// Print the host status of every configured node as JSON.
    #[command(name = "host-stats", about = "Print host status for every node as JSON")]
    HostStats,
}

/// Arguments for the `virtplane exec` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    /// Report a non-zero remote status as the command's own exit code
    /// instead of failing.
    #[arg(long)]
    pub(crate) no_check: bool,
    /// Command to execute on the remote host (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for the `virtplane put` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PutCommand {
    /// Local file to upload.
    #[arg(value_name = "LOCAL")]
    pub(crate) local: String,
    /// Remote directory receiving the file.
    #[arg(value_name = "REMOTE_DIR")]
    pub(crate) remote_dir: String,
}

/// Arguments for the `virtplane get` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct GetCommand {
    /// Remote file to download.
    #[arg(value_name = "REMOTE")]
    pub(crate) remote: String,
    /// Local destination path; missing parent directories are created.
    #[arg(value_name = "LOCAL")]
    pub(crate) local: String,
}

/// Arguments for the `virtplane resources` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ResourcesCommand {
    /// Node identifier from the configured node list.
    #[arg(value_name = "NODE")]
    pub(crate) node: String,
}
