//! Merges batch outcomes into one timestamp-ordered table.
//!
//! Outcomes are folded in batch-index order. When two batches report the
//! same measurement at the same timestamp (an inclusive boundary on both
//! sides), the batch with the higher index wins.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::domain::{SamplingInterval, TimeRange, UtcDateTime};
use crate::error::{FetchError, RequestErrorKind};
use crate::transport::FetchOutcome;

/// One timestamp and a value slot per column; `None` marks an absent value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub timestamp: UtcDateTime,
    pub values: Vec<Option<f64>>,
}

/// Rows strictly increasing by timestamp, one column per requested measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl ResultTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Value of `column` at `timestamp`, if both exist and the value is present.
    pub fn value(&self, timestamp: UtcDateTime, column: &str) -> Option<f64> {
        let index = self.column_index(column)?;
        let row = self
            .rows
            .binary_search_by_key(&timestamp, |row| row.timestamp)
            .ok()?;
        self.rows[row].values[index]
    }

    pub fn first_timestamp(&self) -> Option<UtcDateTime> {
        self.rows.first().map(|row| row.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<UtcDateTime> {
        self.rows.last().map(|row| row.timestamp)
    }
}

/// A batch that ended in failure, and so a sub-range missing from the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub index: usize,
    pub range: TimeRange,
    pub kind: RequestErrorKind,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub attempts: u32,
}

/// Observed rows against the count the sampling interval implies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Completeness {
    pub observed: usize,
    pub expected: usize,
    pub ratio: f64,
}

/// Two consecutive rows further apart than the sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub after: UtcDateTime,
    pub before: UtcDateTime,
    pub missing_samples: u64,
}

/// Table plus everything a caller needs to judge how complete it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchReport {
    pub table: ResultTable,
    pub failures: Vec<FailureReport>,
    /// `None` when the table has no rows.
    pub completeness: Option<Completeness>,
    pub gaps: Vec<Gap>,
    pub batches: usize,
}

impl FetchReport {
    /// True when every batch succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn longest_gap(&self) -> Option<&Gap> {
        self.gaps.iter().max_by_key(|gap| gap.missing_samples)
    }

    pub fn missing_ranges(&self) -> impl Iterator<Item = TimeRange> + '_ {
        self.failures.iter().map(|failure| failure.range)
    }
}

/// Folds `outcomes` into a [`FetchReport`].
///
/// Fails with [`FetchError::AllBatchesFailed`] when there was at least one
/// outcome and none of them succeeded.
pub fn assemble(
    mut outcomes: Vec<FetchOutcome>,
    columns: &[String],
    interval: SamplingInterval,
) -> Result<FetchReport, FetchError> {
    outcomes.sort_by_key(|outcome| outcome.batch().index);

    let batches = outcomes.len();
    let lookup: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let mut accumulator: BTreeMap<UtcDateTime, Vec<Option<f64>>> = BTreeMap::new();
    let mut failures = Vec::new();
    let mut succeeded = 0;

    for outcome in outcomes {
        match outcome {
            FetchOutcome::Success { payload, .. } => {
                succeeded += 1;
                for (name, points) in payload {
                    let Some(&column) = lookup.get(name.as_str()) else {
                        debug!(measurement = %name, "skipping unrequested measurement");
                        continue;
                    };
                    for point in points {
                        accumulator
                            .entry(point.ts)
                            .or_insert_with(|| vec![None; columns.len()])[column] =
                            Some(point.value);
                    }
                }
            }
            FetchOutcome::Failure { batch, error } => failures.push(FailureReport {
                index: batch.index,
                range: batch.range,
                kind: error.kind(),
                code: error.code(),
                message: error.message().to_owned(),
                status: error.status(),
                attempts: error.attempts(),
            }),
        }
    }

    if batches > 0 && succeeded == 0 {
        return Err(FetchError::AllBatchesFailed { failures });
    }

    let rows: Vec<Row> = accumulator
        .into_iter()
        .map(|(timestamp, values)| Row { timestamp, values })
        .collect();

    let interval_ms = interval_millis(interval);
    Ok(FetchReport {
        completeness: completeness(&rows, interval_ms),
        gaps: gaps(&rows, interval_ms),
        table: ResultTable {
            columns: columns.to_vec(),
            rows,
        },
        failures,
        batches,
    })
}

fn interval_millis(interval: SamplingInterval) -> i64 {
    i64::try_from(interval.whole_seconds().saturating_mul(1_000)).unwrap_or(i64::MAX)
}

fn completeness(rows: &[Row], interval_ms: i64) -> Option<Completeness> {
    let first = rows.first()?.timestamp.unix_millis();
    let last = rows.last()?.timestamp.unix_millis();
    let expected = usize::try_from((last - first) / interval_ms + 1).unwrap_or(usize::MAX);
    Some(Completeness {
        observed: rows.len(),
        expected,
        ratio: rows.len() as f64 / expected as f64,
    })
}

fn gaps(rows: &[Row], interval_ms: i64) -> Vec<Gap> {
    rows.windows(2)
        .filter_map(|pair| {
            let delta = pair[1].timestamp.unix_millis() - pair[0].timestamp.unix_millis();
            let missing = (delta - 1) / interval_ms;
            (missing > 0).then(|| Gap {
                after: pair[0].timestamp,
                before: pair[1].timestamp,
                missing_samples: missing as u64,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SeriesPayload;
    use crate::domain::{Batch, DataPoint};
    use crate::error::RequestError;

    const MINUTE: i64 = 60_000;

    fn ts(millis: i64) -> UtcDateTime {
        UtcDateTime::from_unix_millis(millis).expect("valid")
    }

    fn batch(index: usize, start: i64, end: i64) -> Batch {
        Batch {
            index,
            range: TimeRange::new(ts(start), ts(end)).expect("valid"),
        }
    }

    fn success(batch: Batch, points: &[(i64, f64)]) -> FetchOutcome {
        let mut payload = SeriesPayload::new();
        payload.insert(
            String::from("a"),
            points
                .iter()
                .map(|(millis, value)| DataPoint {
                    ts: ts(*millis),
                    value: *value,
                })
                .collect(),
        );
        FetchOutcome::Success { batch, payload }
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    fn minutely() -> SamplingInterval {
        SamplingInterval::from_secs(60).expect("valid")
    }

    #[test]
    fn later_batch_wins_at_a_shared_boundary() {
        let outcomes = vec![
            success(batch(1, 2 * MINUTE, 4 * MINUTE), &[(2 * MINUTE, 20.0)]),
            success(batch(0, 0, 2 * MINUTE), &[(MINUTE, 1.0), (2 * MINUTE, 2.0)]),
        ];

        let report = assemble(outcomes, &columns(&["a"]), minutely()).expect("report");

        assert_eq!(report.table.len(), 2);
        assert_eq!(report.table.value(ts(2 * MINUTE), "a"), Some(20.0));
    }

    #[test]
    fn every_requested_column_is_present_with_absent_markers() {
        let outcomes = vec![success(batch(0, 0, 2 * MINUTE), &[(0, 1.0)])];

        let report = assemble(outcomes, &columns(&["a", "b"]), minutely()).expect("report");

        assert_eq!(report.table.columns(), &["a", "b"]);
        assert_eq!(report.table.rows()[0].values, vec![Some(1.0), None]);
    }

    #[test]
    fn completeness_and_gaps_follow_the_sampling_interval() {
        let outcomes = vec![success(
            batch(0, 0, 5 * MINUTE),
            &[(0, 1.0), (MINUTE, 1.0), (4 * MINUTE, 1.0)],
        )];

        let report = assemble(outcomes, &columns(&["a"]), minutely()).expect("report");

        let completeness = report.completeness.expect("rows present");
        assert_eq!(completeness.observed, 3);
        assert_eq!(completeness.expected, 5);
        assert!((completeness.ratio - 0.6).abs() < 1e-9);
        assert_eq!(
            report.gaps,
            vec![Gap {
                after: ts(MINUTE),
                before: ts(4 * MINUTE),
                missing_samples: 2,
            }]
        );
        assert_eq!(report.longest_gap().map(|gap| gap.missing_samples), Some(2));
    }

    #[test]
    fn failures_are_reported_with_their_ranges() {
        let outcomes = vec![
            success(batch(0, 0, MINUTE), &[(0, 1.0)]),
            FetchOutcome::Failure {
                batch: batch(1, MINUTE, 2 * MINUTE),
                error: RequestError::permanent("bad request").with_status(400),
            },
        ];

        let report = assemble(outcomes, &columns(&["a"]), minutely()).expect("partial");

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].code, "request.permanent");
        assert_eq!(
            report.missing_ranges().collect::<Vec<_>>(),
            vec![batch(1, MINUTE, 2 * MINUTE).range]
        );
    }

    #[test]
    fn all_failed_batches_are_an_error_not_an_empty_table() {
        let outcomes = vec![FetchOutcome::Failure {
            batch: batch(0, 0, MINUTE),
            error: RequestError::transient("timeout"),
        }];

        let error = assemble(outcomes, &columns(&["a"]), minutely()).expect_err("all failed");
        assert!(matches!(error, FetchError::AllBatchesFailed { ref failures } if failures.len() == 1));
    }

    #[test]
    fn successful_batches_without_points_give_an_empty_table() {
        let outcomes = vec![success(batch(0, 0, MINUTE), &[])];

        let report = assemble(outcomes, &columns(&["a"]), minutely()).expect("report");

        assert!(report.table.is_empty());
        assert_eq!(report.completeness, None);
        assert!(report.gaps.is_empty());
    }
}
