use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use time::Duration;

use crate::ValidationError;

/// Parses span text such as `500ms`, `60s`, `15min`, `1h`, `1D` or `2w`.
///
/// Units are case-insensitive. Zero, negative and fractional amounts are rejected.
pub fn parse_span(input: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidDuration {
        value: input.to_owned(),
    };

    let text = input.trim();
    let split = text
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let unit_millis: i64 = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" => 1,
        "" | "s" | "sec" | "secs" => 1_000,
        "m" | "min" | "mins" => 60_000,
        "h" | "hr" | "hrs" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        "w" | "week" | "weeks" => 604_800_000,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(unit_millis)
        .map(Duration::milliseconds)
        .ok_or_else(invalid)
}

/// Formats a span with the largest unit that divides it exactly.
pub fn format_span(span: Duration) -> String {
    let millis = span.whole_milliseconds();
    const UNITS: [(i128, &str); 5] = [
        (86_400_000, "D"),
        (3_600_000, "h"),
        (60_000, "min"),
        (1_000, "s"),
        (1, "ms"),
    ];

    for (size, suffix) in UNITS {
        if millis != 0 && millis % size == 0 {
            return format!("{}{suffix}", millis / size);
        }
    }
    format!("{millis}ms")
}

/// Nominal sampling cadence requested from the platform.
///
/// The data endpoint takes the interval in whole seconds, so sub-second
/// or fractional-second cadences are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingInterval(Duration);

impl SamplingInterval {
    pub fn new(span: Duration) -> Result<Self, ValidationError> {
        if span <= Duration::ZERO || span.subsec_nanoseconds() != 0 {
            return Err(ValidationError::InvalidSamplingInterval {
                value: format_span(span),
            });
        }
        Ok(Self(span))
    }

    pub fn from_secs(seconds: u32) -> Result<Self, ValidationError> {
        Self::new(Duration::seconds(i64::from(seconds)))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn whole_seconds(self) -> u64 {
        self.0.whole_seconds().unsigned_abs()
    }
}

impl Display for SamplingInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_span(self.0))
    }
}

impl FromStr for SamplingInterval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_span(value).and_then(Self::new)
    }
}

impl Serialize for SamplingInterval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
