use std::time::Duration;

use m2v_core::{
    parse_span, FetchReport, M2vClient, MeasurementQuery, RangeRequest, SamplingInterval,
    TimeRange, UtcDateTime,
};
use serde_json::{json, Map, Value};

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::{resolve_machine, CommandResult};

pub async fn run(args: &FetchArgs, client: &M2vClient) -> Result<CommandResult, CliError> {
    let range = TimeRange::new(UtcDateTime::parse(&args.start)?, UtcDateTime::parse(&args.end)?)?;
    let interval = SamplingInterval::new(parse_span(&args.interval)?)?;
    let max_batch_span = parse_span(&args.max_batch_span)?;
    if args.concurrency == Some(0) {
        return Err(m2v_core::ValidationError::ZeroConcurrency.into());
    }

    let machine = resolve_machine(client, &args.machine).await?;
    let query = MeasurementQuery::new(machine, &args.names, interval)?;

    let mut request = RangeRequest::new(query, range)
        .with_max_batch_span(max_batch_span)
        .with_progress(args.progress);
    if let Some(limit) = args.concurrency {
        request = request.with_concurrency(limit);
    }
    if let Some(seconds) = args.deadline_secs {
        request = request.with_deadline(Duration::from_secs(seconds));
    }

    let report = client.fetch_range(request).await?;
    let warnings = failure_warnings(&report);
    let violation = (args.strict && !report.is_complete()).then(|| CliError::StrictModeViolation {
        failed_batches: report.failures.len(),
        total_batches: report.batches,
    });

    let mut result = CommandResult::ok(report_to_value(&report)?).with_warnings(warnings);
    if let Some(violation) = violation {
        result = result.with_strict_violation(violation);
    }
    Ok(result)
}

fn failure_warnings(report: &FetchReport) -> Vec<String> {
    report
        .failures
        .iter()
        .map(|failure| {
            format!(
                "batch {} {} missing: {} ({})",
                failure.index, failure.range, failure.message, failure.code
            )
        })
        .collect()
}

/// Rows become objects keyed by column; absent values are omitted.
fn report_to_value(report: &FetchReport) -> Result<Value, CliError> {
    let columns = report.table.columns();
    let rows: Vec<Value> = report
        .table
        .rows()
        .iter()
        .map(|row| {
            let mut object = Map::new();
            object.insert(
                String::from("timestamp"),
                Value::String(row.timestamp.format_rfc3339()),
            );
            for (column, value) in columns.iter().zip(&row.values) {
                if let Some(value) = value {
                    object.insert(column.clone(), json!(value));
                }
            }
            Value::Object(object)
        })
        .collect();

    Ok(json!({
        "columns": columns,
        "rows": rows,
        "batches": report.batches,
        "completeness": serde_json::to_value(report.completeness)?,
        "gaps": serde_json::to_value(&report.gaps)?,
        "longest_gap": serde_json::to_value(report.longest_gap())?,
        "failures": serde_json::to_value(&report.failures)?,
    }))
}
