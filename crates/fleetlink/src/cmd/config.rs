use fleetlink::exit::{CliResult, SUCCESS};
use fleetlink::output::print_config;

use crate::cmd::{ConfigArgs, Context};

pub fn run(_args: ConfigArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    print_config(&config, ctx.format);
    Ok(SUCCESS)
}
