use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleetlink::exit::{
    bootstrap_error, io_error, rpc_error, store_error, CliError, CliResult, DATA_INVALID,
    FAILURE, SUCCESS, USAGE,
};
use fleetlink::extension_host::ExtensionHost;
use fleetlink::extension_worker::OperationOutput;
use fleetlink::host::{start_worker, BootstrapConfig, WorkerHost};
use fleetlink::logging::{value_name, WORKER_LOG_FORMAT_ENV, WORKER_LOG_LEVEL_ENV};
use fleetlink::output::{print_operation_output, print_operations};
use fleetlink::store::Data;
use tracing::{debug, warn};

use crate::cmd::{parse_duration, Context, RunArgs};

const WORKER_BIN: &str = "fleetlink-worker";

pub async fn run(args: RunArgs, ctx: &Context) -> CliResult<i32> {
    let startup_timeout = parse_duration(&args.startup_timeout)?;
    let manifest = std::path::absolute(&args.manifest)
        .map_err(|err| io_error(&format!("invalid manifest path {}", args.manifest.display()), err))?;
    let data = Data::load(&ctx.data_path).map_err(|err| store_error("failed to load data", err))?;

    let config = BootstrapConfig {
        worker_program: args.worker.clone().unwrap_or_else(default_worker_program),
        startup_timeout,
        env: vec![
            (WORKER_LOG_LEVEL_ENV.to_string(), value_name(&ctx.log_level)),
            (WORKER_LOG_FORMAT_ENV.to_string(), value_name(&ctx.log_format)),
        ],
        ..BootstrapConfig::default()
    };
    let host = Arc::new(ExtensionHost::new(data));
    let worker = start_worker(config, host.clone())
        .await
        .map_err(|err| bootstrap_error("worker startup failed", err))?;

    let result = drive(&worker, &host, &manifest, &args, ctx).await;

    match worker.shutdown().await {
        Ok(status) => debug!(?status, "worker stopped"),
        Err(err) => warn!(error = %err, "worker shutdown failed"),
    }
    result
}

async fn drive(
    worker: &WorkerHost,
    host: &ExtensionHost,
    manifest: &Path,
    args: &RunArgs,
    ctx: &Context,
) -> CliResult<i32> {
    let manifest_arg = manifest.to_string_lossy();
    worker
        .worker()
        .load_file(&manifest_arg)
        .await
        .map_err(|err| match err.fault() {
            Some(fault) => CliError::new(
                DATA_INVALID,
                format!("failed to load extension: {}", fault_text(fault)),
            ),
            None => rpc_error("failed to load extension", err),
        })?;

    let Some(name) = &args.operation else {
        print_operations(&host.operations().list(), ctx.format);
        return Ok(SUCCESS);
    };

    let description = host
        .operations()
        .get(name)
        .ok_or_else(|| CliError::new(USAGE, format!("unknown operation: {name}")))?;
    if args.args.len() < description.args.len() {
        return Err(CliError::new(
            USAGE,
            format!(
                "operation {name} expects arguments: {}",
                description.args.join(" ")
            ),
        ));
    }

    let value = worker
        .worker()
        .execute_registered_operation(name, &args.args)
        .await
        .map_err(|err| rpc_error(&format!("operation {name} failed"), err))?;
    let output: OperationOutput = serde_json::from_value(value).map_err(|err| {
        CliError::new(DATA_INVALID, format!("unexpected operation result: {err}"))
    })?;

    print_operation_output(name, &output, ctx.format);
    Ok(if output.success() { SUCCESS } else { FAILURE })
}

fn fault_text(fault: &fleetlink::frame::Fault) -> String {
    match fault.error_message() {
        Some(message) => message.to_string(),
        None => fault.to_string(),
    }
}

/// `fleetlink-worker` next to the running executable, else from `PATH`.
fn default_worker_program() -> PathBuf {
    let file_name = format!("{WORKER_BIN}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(file_name))
}
