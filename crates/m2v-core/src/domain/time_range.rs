use std::fmt::{Display, Formatter};
use std::iter::FusedIterator;

use serde::Serialize;
use time::Duration;

use crate::{UtcDateTime, ValidationError};

/// Half-open interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: UtcDateTime,
    end: UtcDateTime,
}

impl TimeRange {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidRange {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> UtcDateTime {
        self.start
    }

    pub const fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end.since(self.start)
    }

    pub fn contains(&self, ts: UtcDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One element of a partition. `index` fixes output order independent of completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Batch {
    pub index: usize,
    pub range: TimeRange,
}

/// A validated range plus the maximum span each batch may cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    range: TimeRange,
    max_span: Duration,
}

impl BatchSpec {
    pub fn new(range: TimeRange, max_span: Duration) -> Result<Self, ValidationError> {
        if max_span <= Duration::ZERO {
            return Err(ValidationError::InvalidSpan {
                nanos: max_span.whole_nanoseconds(),
            });
        }
        Ok(Self { range, max_span })
    }

    pub const fn range(&self) -> TimeRange {
        self.range
    }

    pub const fn max_span(&self) -> Duration {
        self.max_span
    }

    /// Number of sub-ranges: `ceil((end - start) / max_span)`.
    pub fn len(&self) -> usize {
        let total = self.range.duration().whole_nanoseconds();
        let span = self.max_span.whole_nanoseconds();
        let count = (total + span - 1) / span;
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// A fresh iterator over the sub-ranges. Each call starts from the beginning.
    pub fn iter(&self) -> Partition {
        Partition {
            cursor: self.range.start,
            end: self.range.end,
            max_span: self.max_span,
        }
    }

    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        self.iter()
            .enumerate()
            .map(|(index, range)| Batch { index, range })
    }
}

impl<'a> IntoIterator for &'a BatchSpec {
    type Item = TimeRange;
    type IntoIter = Partition;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy, contiguous sequence of sub-ranges covering a [`BatchSpec`].
///
/// Every sub-range ends at `min(start + max_span, end)`, so the last one
/// ends exactly at the requested end.
#[derive(Debug, Clone)]
pub struct Partition {
    cursor: UtcDateTime,
    end: UtcDateTime,
    max_span: Duration,
}

impl Iterator for Partition {
    type Item = TimeRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let right = self
            .cursor
            .checked_add(self.max_span)
            .map_or(self.end, |candidate| candidate.min(self.end));
        let range = TimeRange {
            start: self.cursor,
            end: right,
        };
        self.cursor = right;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.cursor >= self.end {
            return (0, Some(0));
        }
        let remaining = BatchSpec {
            range: TimeRange {
                start: self.cursor,
                end: self.end,
            },
            max_span: self.max_span,
        }
        .len();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Partition {}

impl FusedIterator for Partition {}

/// Splits `range` into sub-ranges no longer than `max_span`.
pub fn partition(range: TimeRange, max_span: Duration) -> Result<Partition, ValidationError> {
    BatchSpec::new(range, max_span).map(|spec| spec.iter())
}

/// Validates both bounds and the span before any sub-range is produced.
pub fn partition_between(
    start: UtcDateTime,
    end: UtcDateTime,
    max_span: Duration,
) -> Result<Partition, ValidationError> {
    partition(TimeRange::new(start, end)?, max_span)
}
