use fleetlink::exit::{store_error, CliResult, SUCCESS};
use fleetlink::output::print_data;
use fleetlink::store::Data;

use crate::cmd::{Context, DataArgs};

pub fn run(_args: DataArgs, ctx: &Context) -> CliResult<i32> {
    let data = Data::load(&ctx.data_path).map_err(|err| store_error("failed to load data", err))?;
    print_data(&data, ctx.format);
    Ok(SUCCESS)
}
