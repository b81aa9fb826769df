use m2v_core::{M2vClient, PageRequest};

use crate::cli::MachinesArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &MachinesArgs, client: &M2vClient) -> Result<CommandResult, CliError> {
    let page = PageRequest::by_name()
        .with_page(args.page)
        .with_size(args.size)
        .with_filter(args.filter.as_str());

    let machines = client.machines(&page).await?;
    Ok(CommandResult::ok(serde_json::to_value(machines)?))
}
