//! Command-line interface definitions for the `drover` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `drover` binary.
#[derive(Debug, Parser)]
#[command(
    name = "drover",
    about = "Describe a job once and run it on a shell, SSH host, container, or batch cluster",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List resources known to the inventory.
    #[command(name = "ls", about = "List resources known to the inventory")]
    Ls,
    /// Provision a resource and record it in the inventory.
    #[command(name = "create", about = "Provision a resource and record it")]
    Create(CreateCommand),
    /// Tear a resource down and drop it from the inventory.
    #[command(name = "delete", about = "Tear a resource down and drop it")]
    Delete(DeleteCommand),
    /// Execute a one-off command on a resource.
    #[command(name = "exec", about = "Execute a one-off command on a resource")]
    Exec(ExecCommand),
    /// Stage inputs, run a job, and fetch its outputs.
    #[command(name = "run", about = "Stage inputs, run a job, and fetch outputs")]
    Run(RunCommand),
}

/// Arguments for the `drover create` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Name for the new resource, unique within the inventory.
    #[arg(long, short = 'n')]
    pub(crate) name: String,
    /// Resource type: shell, ssh, or container.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub(crate) resource_type: String,
    /// Remote host name or address (ssh resources).
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Remote user to connect as (ssh resources).
    #[arg(long)]
    pub(crate) user: Option<String>,
    /// TCP port for SSH (ssh resources).
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Path to the SSH private key file (ssh resources).
    #[arg(long, value_name = "PATH")]
    pub(crate) identity_file: Option<String>,
    /// Image to launch the container from (container resources).
    #[arg(long)]
    pub(crate) image: Option<String>,
}

/// Arguments for the `drover delete` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Name of the resource to delete.
    #[arg(long, short = 'n')]
    pub(crate) name: Option<String>,
    /// Identifier (or unique prefix) of the resource to delete.
    #[arg(long = "id", value_name = "ID")]
    pub(crate) resource_id: Option<String>,
    /// Delete without prompting for confirmation.
    #[arg(long, short = 'y')]
    pub(crate) yes: bool,
}

/// Arguments for the `drover exec` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    /// Name of the resource to execute on.
    #[arg(long, short = 'n')]
    pub(crate) name: String,
    /// Command to execute (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for the `drover run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Name of the resource to run on.
    #[arg(long, short = 'n')]
    pub(crate) name: String,
    /// Submission backend: local or batch.
    #[arg(long, value_name = "TYPE")]
    pub(crate) submission: Option<String>,
    /// Remote base directory for staging; resolved against the remote
    /// home directory when relative.
    #[arg(long, value_name = "PATH")]
    pub(crate) root_directory: Option<String>,
    /// Input path to stage before the job runs; repeatable.
    #[arg(long = "input", value_name = "PATH")]
    pub(crate) inputs: Vec<String>,
    /// Output path to fetch after the job finishes; repeatable.
    #[arg(long = "output", value_name = "PATH")]
    pub(crate) outputs: Vec<String>,
    /// Command to execute in the working directory (use -- to separate
    /// flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
