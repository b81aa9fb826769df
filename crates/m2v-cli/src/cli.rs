//! CLI argument definitions for m2v.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Fetch a measurement range in batches and assemble one table |
//! | `machines` | List machines visible to the account |
//! | `measurements` | List the measurements recorded for a machine |
//! | `whoami` | Show the authenticated user |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, ndjson, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! Connection settings come from `EUROGARD_*` environment variables.
//!
//! # Examples
//!
//! ```bash
//! # Two days of spindle speed in hourly samples
//! m2v fetch --machine "Press 1" --names spindle_speed \
//!     --start 2025-01-01T00:00:00Z --end 2025-01-03T00:00:00Z --interval 1h
//!
//! # Fail with exit code 5 when any batch is missing
//! m2v fetch --machine 0b7e5c1a-3d44-4a8f-9a51-7c3e2f1d9b20 --names a,b \
//!     --start 2025-01-01T00:00:00Z --end 2025-02-01T00:00:00Z --strict
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

/// m2v - batched time-series retrieval for the Eurogard M2V platform
#[derive(Debug, Parser)]
#[command(
    name = "m2v",
    author,
    version,
    about = "Batched time-series retrieval for the Eurogard M2V platform"
)]
pub struct Cli {
    /// Output format for results.
    ///
    /// - json: Single JSON object (default)
    /// - ndjson: One JSON object per line
    /// - table: Plain text table
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Ndjson,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch measurements over a time range.
    ///
    /// The range is split into batches of at most `--max-batch-span`,
    /// fetched concurrently and merged into one table ordered by time.
    Fetch(FetchArgs),
    /// List machines.
    Machines(MachinesArgs),
    /// List the measurements of one machine.
    Measurements(MeasurementsArgs),
    /// Show the user the configured credentials belong to.
    Whoami,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Machine UUID or exact machine name.
    #[arg(long)]
    pub machine: String,

    /// Comma-separated measurement names.
    #[arg(long, value_delimiter = ',', required = true)]
    pub names: Vec<String>,

    /// Inclusive start, RFC3339 UTC (e.g. 2025-01-01T00:00:00Z).
    #[arg(long)]
    pub start: String,

    /// Exclusive end, RFC3339 UTC.
    #[arg(long)]
    pub end: String,

    /// Sampling interval (e.g. 60s, 15min, 1h).
    #[arg(long, default_value = "60s")]
    pub interval: String,

    /// Largest time span requested in one batch (e.g. 6h, 1D).
    #[arg(long, default_value = "1D")]
    pub max_batch_span: String,

    /// Batches in flight at once. Defaults to the client limit.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Log one line per completed batch.
    #[arg(long, default_value_t = false)]
    pub progress: bool,

    /// Abandon batches still running after this many seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Treat a partial result as a failure (exit code 5).
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct MachinesArgs {
    /// Zero-based page number.
    #[arg(long, default_value_t = 0)]
    pub page: u32,

    #[arg(long, default_value_t = 10)]
    pub size: u32,

    /// Platform filter expression.
    #[arg(long, default_value = "__archived:false")]
    pub filter: String,
}

#[derive(Debug, Args)]
pub struct MeasurementsArgs {
    /// Machine UUID or exact machine name.
    pub machine: String,

    #[arg(long, default_value_t = 0)]
    pub page: u32,

    #[arg(long, default_value_t = 10)]
    pub size: u32,
}
