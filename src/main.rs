//! Binary entry point for the drover CLI.

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use drover::{
    CommandError, ConfigFragment, ConfigurationError, DeleteRequest, DroverConfig, ExecuteOptions,
    FollowOutcome, JobSpec, JobSpecError, JobStatus, ManagerError, Orchestrator, OrchestratorError,
    Resource, ResourceConfig, ResourceError, ResourceManager, Session, TomlInventoryStore,
};

use cli::{Cli, CreateCommand, DeleteCommand, ExecCommand, RunCommand};

mod cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("resource error: {0}")]
    Manager(#[from] ManagerError),
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
    #[error("resource error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("invalid job spec: {0}")]
    Spec(#[from] JobSpecError),
    #[error("job failed: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let parsed = Cli::parse();
    let exit_code = match dispatch(parsed).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(parsed: Cli) -> Result<i32, CliError> {
    match parsed {
        Cli::Ls => ls_command(),
        Cli::Create(args) => create_command(&args),
        Cli::Delete(args) => delete_command(&args),
        Cli::Exec(args) => exec_command(&args),
        Cli::Run(args) => run_command(&args).await,
    }
}

fn manager() -> ResourceManager<TomlInventoryStore> {
    ResourceManager::new(TomlInventoryStore::new())
}

fn ls_command() -> Result<i32, CliError> {
    let inventory = manager().get_inventory()?;
    let mut stdout = io::stdout();
    for (name, config) in &inventory {
        writeln!(
            stdout,
            "{name}\t{}\t{}\t{}",
            config.type_tag().unwrap_or("?"),
            config.get("status").unwrap_or("not-created"),
            config.id().unwrap_or("-"),
        )
        .ok();
    }
    Ok(0)
}

fn create_command(args: &CreateCommand) -> Result<i32, CliError> {
    let mut fields = ConfigFragment::from([
        (String::from("name"), args.name.clone()),
        (String::from("type"), args.resource_type.clone()),
    ]);
    if let Some(ref host) = args.host {
        fields.insert(String::from("host"), host.clone());
    }
    if let Some(ref user) = args.user {
        fields.insert(String::from("user"), user.clone());
    }
    if let Some(port) = args.port {
        fields.insert(String::from("port"), port.to_string());
    }
    if let Some(ref identity_file) = args.identity_file {
        fields.insert(String::from("identity_file"), identity_file.clone());
    }
    if let Some(ref image) = args.image {
        fields.insert(String::from("image"), image.clone());
    }

    let created = manager().create_resource(&ResourceConfig::from_map(fields))?;
    writeln!(
        io::stdout(),
        "created {} ({})",
        args.name,
        created.id().unwrap_or("-")
    )
    .ok();
    Ok(0)
}

fn delete_command(args: &DeleteCommand) -> Result<i32, CliError> {
    let skip_confirmation = args.yes;
    let deleted = manager().delete_resource(
        args.name.as_deref(),
        args.resource_id.as_deref(),
        |request| skip_confirmation || confirm_deletion(request),
    )?;
    if deleted {
        Ok(0)
    } else {
        writeln!(io::stderr(), "deletion declined").ok();
        Ok(1)
    }
}

/// Terminal prompt wired in as the deletion confirmation callback; the
/// library itself never reads stdin.
fn confirm_deletion(request: &DeleteRequest) -> bool {
    write!(
        io::stderr(),
        "Delete the resource '{}'? (ID: {}) [y/N] ",
        request.name,
        request.id
    )
    .ok();
    io::stderr().flush().ok();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn exec_command(args: &ExecCommand) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;

    let (config, _) = manager().get_resource_info(Some(&args.name), None)?;
    let mut resource = ResourceManager::<TomlInventoryStore>::factory(&config)?;
    resource.connect()?;
    let session = resource.session()?;

    match session.execute_command(&args.command, &ExecuteOptions::new()) {
        Ok(output) => {
            write!(io::stdout(), "{}", output.stdout).ok();
            write!(io::stderr(), "{}", output.stderr).ok();
            Ok(0)
        }
        Err(CommandError::Failed {
            status,
            stdout,
            stderr,
        }) => {
            write!(io::stdout(), "{stdout}").ok();
            write!(io::stderr(), "{stderr}").ok();
            Ok(status.unwrap_or(1))
        }
        Err(err) => Err(CliError::Resource(ResourceError::Session(err.into()))),
    }
}

async fn run_command(args: &RunCommand) -> Result<i32, CliError> {
    if let Some(result) = fake_run_from_env() {
        return result;
    }

    validate_command_args(&args.command)?;
    let spec = build_job_spec(args)?;

    let config =
        DroverConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let (resource_config, _) = manager().get_resource_info(Some(&args.name), None)?;
    let mut resource = ResourceManager::<TomlInventoryStore>::factory(&resource_config)?;
    resource.connect()?;
    let session = resource.session()?;

    let cwd = env::current_dir().map_err(|err| CliError::Config(err.to_string()))?;
    let local_directory = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::Config(path.display().to_string()))?;

    let mut orchestrator = Orchestrator::from_spec(session, spec, local_directory, &config)?;
    orchestrator.prepare_remote()?;
    orchestrator.submit()?;
    let outcome = orchestrator.follow(None).await?;
    let report = orchestrator.fetch()?;

    for missing in &report.missing {
        writeln!(io::stderr(), "expected output not produced: {missing}").ok();
    }

    match outcome {
        FollowOutcome::Terminal(JobStatus::Completed) if report.is_complete() => Ok(0),
        FollowOutcome::Terminal(_) | FollowOutcome::StillRunning => Ok(1),
    }
}

fn build_job_spec(args: &RunCommand) -> Result<JobSpec, JobSpecError> {
    let mut builder = JobSpec::builder().command(render_command(&args.command));
    if let Some(ref submission) = args.submission {
        builder = builder.submission_type(submission.clone());
    }
    if let Some(ref root_directory) = args.root_directory {
        builder = builder.root_directory(root_directory.clone());
    }
    for input in &args.inputs {
        builder = builder.input(input.clone());
    }
    for output in &args.outputs {
        builder = builder.output(output.clone());
    }
    builder.build()
}

fn render_command(args: &[String]) -> String {
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

fn fake_run_from_env() -> Option<Result<i32, CliError>> {
    let mode = env::var("DROVER_FAKE_RUN_MODE").ok()?;
    match mode.as_str() {
        "exit-0" => {
            writeln!(io::stdout(), "fake-stdout").ok();
            writeln!(io::stderr(), "fake-stderr").ok();
            Some(Ok(0))
        }
        "exit-7" => {
            writeln!(io::stdout(), "fake-stdout").ok();
            writeln!(io::stderr(), "fake-stderr").ok();
            Some(Ok(7))
        }
        "spec-error" => Some(Err(CliError::Spec(JobSpecError::Validation(String::from(
            "command_str",
        ))))),
        _ => None,
    }
}
