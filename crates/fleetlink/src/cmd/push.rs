use fleetlink::exchange::{peer_address, push};
use fleetlink::exit::{channel_error, store_error, CliError, CliResult, FAILURE, SUCCESS};
use fleetlink::output::print_sync_result;
use fleetlink::store::Data;
use tracing::debug;

use crate::cmd::{find_remote, Context, SyncArgs};

pub async fn run(args: SyncArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let remote = find_remote(&config, &args.remote)?;
    let data = Data::load(&ctx.data_path).map_err(|err| store_error("failed to load data", err))?;

    let addr = peer_address(&remote.url, args.port);
    debug!(remote = %remote.name, addr = %addr, "executing push");
    let accepted = push(&addr, &data)
        .await
        .map_err(|err| channel_error("push failed", err))?;
    if !accepted {
        return Err(CliError::new(
            FAILURE,
            format!("remote {} did not accept the data", remote.name),
        ));
    }

    print_sync_result("pushed", &remote.name, &data, ctx.format);
    Ok(SUCCESS)
}
