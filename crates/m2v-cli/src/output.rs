use serde_json::Value;

use crate::cli::OutputFormat;
use crate::commands::Envelope;
use crate::error::CliError;

pub fn render(envelope: &Envelope, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Ndjson => {
            for line in ndjson_lines(envelope)? {
                println!("{line}");
            }
        }
        OutputFormat::Table => render_table(envelope)?,
    }

    Ok(())
}

/// One line for the meta block, then one per row when the data is tabular.
fn ndjson_lines(envelope: &Envelope) -> Result<Vec<String>, CliError> {
    let mut lines = vec![serde_json::to_string(&serde_json::json!({ "meta": envelope.meta }))?];
    match envelope.data.get("rows").and_then(Value::as_array) {
        Some(rows) => {
            for row in rows {
                lines.push(serde_json::to_string(row)?);
            }
        }
        None => lines.push(serde_json::to_string(&envelope.data)?),
    }
    Ok(lines)
}

fn render_table(envelope: &Envelope) -> Result<(), CliError> {
    println!("request_id  : {}", envelope.meta.request_id);
    println!("generated_at: {}", envelope.meta.generated_at);
    println!("latency_ms  : {}", envelope.meta.latency_ms);

    if !envelope.meta.warnings.is_empty() {
        println!("warnings:");
        for warning in &envelope.meta.warnings {
            println!("  - {warning}");
        }
    }

    match table_lines(&envelope.data) {
        Some(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        None => {
            println!("data:");
            let pretty_data = serde_json::to_string_pretty(&envelope.data)?;
            for line in pretty_data.lines() {
                println!("  {line}");
            }
        }
    }

    Ok(())
}

/// Aligned text table for data carrying `columns` and `rows`.
fn table_lines(data: &Value) -> Option<Vec<String>> {
    let columns: Vec<&str> = data
        .get("columns")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let rows = data.get("rows")?.as_array()?;

    let mut header = vec![String::from("timestamp")];
    header.extend(columns.iter().map(|column| (*column).to_owned()));

    let mut cells: Vec<Vec<String>> = vec![header];
    for row in rows {
        let mut line = vec![cell(row.get("timestamp"))];
        line.extend(columns.iter().map(|column| cell(row.get(*column))));
        cells.push(line);
    }

    let widths: Vec<usize> = (0..=columns.len())
        .map(|index| cells.iter().map(|line| line[index].len()).max().unwrap_or(0))
        .collect();

    Some(
        cells
            .iter()
            .map(|line| {
                line.iter()
                    .zip(&widths)
                    .map(|(text, width)| format!("{text:<width$}"))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_owned()
            })
            .collect(),
    )
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::from("-"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
