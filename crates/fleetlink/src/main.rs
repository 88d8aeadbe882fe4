mod cmd;

use std::path::PathBuf;

use clap::Parser;
use fleetlink::exit::{CliError, INTERNAL};
use fleetlink::logging::{init_logging, LogFormat, LogLevel};
use fleetlink::output::OutputFormat;

use crate::cmd::{Command, Context};

#[derive(Parser, Debug)]
#[command(name = "fleetlink", version, about = "Fleet management CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Repository and project data file.
    #[arg(
        long,
        value_name = "PATH",
        env = "FLEETLINK_DATA",
        default_value = "data.json",
        global = true
    )]
    data: PathBuf,

    /// Configuration file with the root path and remotes.
    #[arg(
        long,
        value_name = "PATH",
        env = "FLEETLINK_CONFIG",
        default_value = "config.json",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = Context {
        data_path: cli.data,
        config_path: cli.config,
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        log_format: cli.log_format,
        log_level: cli.log_level,
    };
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, ctx)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_trailing_operation_args() {
        let cli = Cli::try_parse_from([
            "fleetlink",
            "run",
            "ext.json",
            "deploy",
            "prod",
            "--dry-run",
        ])
        .expect("run args should parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.operation.as_deref(), Some("deploy"));
        assert_eq!(args.args, ["prod", "--dry-run"]);
    }

    #[test]
    fn parses_remote_list() {
        let cli = Cli::try_parse_from(["fleetlink", "remote", "list"])
            .expect("remote list should parse");
        assert!(matches!(cli.command, Command::Remote(cmd::RemoteCommand::List)));
    }

    #[test]
    fn push_requires_a_remote() {
        let err = Cli::try_parse_from(["fleetlink", "push"]).expect_err("missing remote should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_paths_apply_after_the_subcommand() {
        let cli = Cli::try_parse_from(["fleetlink", "data", "--data", "/tmp/fleet.json"])
            .expect("data args should parse");
        assert_eq!(cli.data, PathBuf::from("/tmp/fleet.json"));
    }
}
