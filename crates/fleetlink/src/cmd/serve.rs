use std::sync::Arc;

use fleetlink::exchange::{open_server, peer_address, DataStore};
use fleetlink::exit::{channel_error, io_error, store_error, CliResult, SUCCESS};
use fleetlink::output::print_listening;
use tracing::info;

use crate::cmd::{Context, ServeArgs};

pub async fn run(args: ServeArgs, ctx: &Context) -> CliResult<i32> {
    let store = DataStore::open(&ctx.data_path)
        .map_err(|err| store_error("failed to load data", err))?;
    let addr = peer_address(&args.bind, args.port);

    let Some(server) = open_server(&addr, Arc::new(store))
        .await
        .map_err(|err| channel_error("bind failed", err))?
    else {
        return Ok(SUCCESS);
    };
    print_listening(server.local_addr(), ctx.format);

    tokio::select! {
        () = server.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler setup failed", err))?;
            info!("interrupted; shutting down");
        }
    }
    Ok(SUCCESS)
}
