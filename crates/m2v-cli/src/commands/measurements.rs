use m2v_core::{M2vClient, PageRequest};

use crate::cli::MeasurementsArgs;
use crate::error::CliError;

use super::{resolve_machine, CommandResult};

pub async fn run(args: &MeasurementsArgs, client: &M2vClient) -> Result<CommandResult, CliError> {
    let machine = resolve_machine(client, &args.machine).await?;
    let page = PageRequest::recently_updated()
        .with_page(args.page)
        .with_size(args.size);

    let measurements = client.machine_measurements(&machine, &page).await?;
    Ok(CommandResult::ok(serde_json::json!({
        "machine": machine,
        "measurements": measurements,
    })))
}
