use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use fleetlink::config::{Config, Remote};
use fleetlink::exchange::DEFAULT_PORT;
use fleetlink::exit::{store_error, CliError, CliResult, USAGE};
use fleetlink::logging::{LogFormat, LogLevel};
use fleetlink::output::OutputFormat;

pub mod config;
pub mod data;
pub mod pull;
pub mod push;
pub mod remote;
pub mod run;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the local dataset to peers until interrupted.
    Serve(ServeArgs),
    /// Send the local dataset to a remote.
    Push(SyncArgs),
    /// Fetch a remote's dataset and merge it into the local one.
    Pull(SyncArgs),
    /// Print the local repositories and projects.
    Data(DataArgs),
    /// Manage configured remotes.
    #[command(subcommand)]
    Remote(RemoteCommand),
    /// Print the current configuration.
    Config(ConfigArgs),
    /// Load an extension in a worker process and list or run its operations.
    Run(RunArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub data_path: PathBuf,
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub log_format: LogFormat,
    pub log_level: LogLevel,
}

impl Context {
    pub fn load_config(&self) -> CliResult<Config> {
        Config::load(&self.config_path)
            .map_err(|err| store_error("failed to load config", err))
    }
}

pub async fn run(command: Command, ctx: Context) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, &ctx).await,
        Command::Push(args) => push::run(args, &ctx).await,
        Command::Pull(args) => pull::run(args, &ctx).await,
        Command::Data(args) => data::run(args, &ctx),
        Command::Remote(command) => remote::run(command, &ctx),
        Command::Config(args) => config::run(args, &ctx),
        Command::Run(args) => run::run(args, &ctx).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
    /// Port to listen on.
    #[arg(long, env = "FLEETLINK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Name of a remote from the config file.
    pub remote: String,
    /// Exchange port, used when the remote url has none.
    #[arg(long, env = "FLEETLINK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Args, Debug, Default)]
pub struct DataArgs {}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// List configured remotes.
    List,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Extension manifest to load.
    pub manifest: PathBuf,
    /// Operation to execute. Lists the registered operations when omitted.
    pub operation: Option<String>,
    /// Arguments for the operation.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Worker executable. Defaults to fleetlink-worker next to this binary.
    #[arg(long, env = "FLEETLINK_WORKER", value_name = "PATH")]
    pub worker: Option<PathBuf>,
    /// Time the worker has to connect (e.g. 60s, 500ms).
    #[arg(long, default_value = "60s")]
    pub startup_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Resolve a remote by name, or fail with a usage error.
pub fn find_remote(config: &Config, name: &str) -> CliResult<Remote> {
    config
        .remote(name)
        .cloned()
        .ok_or_else(|| CliError::new(USAGE, format!("unknown remote: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn unknown_remote_is_a_usage_error() {
        let err = find_remote(&Config::default(), "lab").unwrap_err();
        assert_eq!(err.code, USAGE);
        assert_eq!(err.message, "unknown remote: lab");
    }
}
