use fleetlink::exit::{CliResult, SUCCESS};
use fleetlink::output::print_remotes;

use crate::cmd::{Context, RemoteCommand};

pub fn run(command: RemoteCommand, ctx: &Context) -> CliResult<i32> {
    match command {
        RemoteCommand::List => {
            let config = ctx.load_config()?;
            print_remotes(&config.remotes, ctx.format);
            Ok(SUCCESS)
        }
    }
}
