use m2v_core::M2vClient;

use crate::error::CliError;

use super::CommandResult;

pub async fn run(client: &M2vClient) -> Result<CommandResult, CliError> {
    let user = client.user_info().await?;
    Ok(CommandResult::ok(user))
}
