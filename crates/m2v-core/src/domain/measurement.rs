use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{SamplingInterval, UtcDateTime, ValidationError};

/// Platform identifier of a machine (its UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMachineId);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MachineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to ask the data endpoint for, independent of the time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementQuery {
    machine: MachineId,
    names: Vec<String>,
    interval: SamplingInterval,
}

impl MeasurementQuery {
    /// Builds a query; names are trimmed and de-duplicated keeping first occurrence order.
    pub fn new<I, S>(
        machine: MachineId,
        names: I,
        interval: SamplingInterval,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(ValidationError::EmptyMeasurementName);
            }
            if seen.insert(name.to_owned()) {
                unique.push(name.to_owned());
            }
        }

        if unique.is_empty() {
            return Err(ValidationError::EmptyMeasurementList);
        }

        Ok(Self {
            machine,
            names: unique,
            interval,
        })
    }

    pub fn machine(&self) -> &MachineId {
        &self.machine
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn interval(&self) -> SamplingInterval {
        self.interval
    }
}

/// A single sample reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    pub ts: UtcDateTime,
    pub value: f64,
}
