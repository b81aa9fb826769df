mod fetch;
mod machines;
mod measurements;
mod whoami;

use std::time::Instant;

use m2v_core::{M2vClient, MachineId, Settings, UtcDateTime};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    /// Set when the command produced output but must still fail.
    pub strict_violation: Option<CliError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            strict_violation: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_strict_violation(mut self, violation: CliError) -> Self {
        self.strict_violation = Some(violation);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub generated_at: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub data: Value,
}

/// Rendered output plus an error to report after rendering it.
pub struct Completed {
    pub envelope: Envelope,
    pub strict_violation: Option<CliError>,
}

pub async fn run(cli: &Cli) -> Result<Completed, CliError> {
    let started = Instant::now();
    let client = M2vClient::new(Settings::from_env()?);

    let CommandResult {
        data,
        warnings,
        strict_violation,
    } = match &cli.command {
        Command::Fetch(args) => fetch::run(args, &client).await?,
        Command::Machines(args) => machines::run(args, &client).await?,
        Command::Measurements(args) => measurements::run(args, &client).await?,
        Command::Whoami => whoami::run(&client).await?,
    };

    let meta = EnvelopeMeta {
        request_id: Uuid::new_v4().to_string(),
        generated_at: UtcDateTime::now().format_rfc3339(),
        latency_ms: started.elapsed().as_millis() as u64,
        warnings,
    };

    Ok(Completed {
        envelope: Envelope { meta, data },
        strict_violation,
    })
}

/// Accepts a machine UUID as is and looks anything else up by exact name.
async fn resolve_machine(client: &M2vClient, raw: &str) -> Result<MachineId, CliError> {
    if Uuid::parse_str(raw.trim()).is_ok() {
        return Ok(MachineId::parse(raw)?);
    }

    debug!(name = raw, "resolving machine by name");
    match client.find_machine_by_name(raw.trim()).await? {
        Some(machine) => Ok(MachineId::parse(&machine.uuid)?),
        None => Err(CliError::Command(format!("no machine named '{raw}'"))),
    }
}
