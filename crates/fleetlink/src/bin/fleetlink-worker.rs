//! Extension worker. Started by `fleetlink run` with the socket path to
//! connect back to; exits when the host closes the connection.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleetlink::exit::{bootstrap_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use fleetlink::extension_worker::ExtensionWorker;
use fleetlink::host::run_worker;
use fleetlink::logging::{
    init_logging, LogFormat, LogLevel, WORKER_LOG_FORMAT_ENV, WORKER_LOG_LEVEL_ENV,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fleetlink-worker", version, about = "fleetlink extension worker")]
struct Cli {
    /// Socket path of the host.
    pipe: PathBuf,

    /// Log output format (stderr).
    #[arg(long, env = WORKER_LOG_FORMAT_ENV, default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, env = WORKER_LOG_LEVEL_ENV, default_value = "info")]
    log_level: LogLevel,
}

async fn run(cli: Cli) -> CliResult<i32> {
    let session = run_worker(&cli.pipe, |host| Arc::new(ExtensionWorker::new(host)))
        .await
        .map_err(|err| bootstrap_error("worker startup failed", err))?;

    tokio::select! {
        () = session.closed() => info!("host closed the connection"),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler setup failed", err))?;
            info!("interrupted");
        }
    }
    Ok(SUCCESS)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(cli)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
