use fleetlink::exchange::{peer_address, pull};
use fleetlink::exit::{channel_error, store_error, CliResult, SUCCESS};
use fleetlink::output::print_sync_result;
use fleetlink::store::{merge_data, Data};
use tracing::{debug, info};

use crate::cmd::{find_remote, Context, SyncArgs};

pub async fn run(args: SyncArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let remote = find_remote(&config, &args.remote)?;
    let mut local =
        Data::load(&ctx.data_path).map_err(|err| store_error("failed to load data", err))?;

    let addr = peer_address(&remote.url, args.port);
    debug!(remote = %remote.name, addr = %addr, "executing pull");
    let incoming = pull(&addr)
        .await
        .map_err(|err| channel_error("pull failed", err))?;

    merge_data(&mut local, incoming.clone());
    local
        .save(&ctx.data_path)
        .map_err(|err| store_error("failed to save data", err))?;
    info!(
        repos = local.repos.len(),
        projects = local.projects.len(),
        "local data updated"
    );
    print_sync_result("pulled", &remote.name, &incoming, ctx.format);
    Ok(SUCCESS)
}
