//! # Domain Models
//!
//! Time and measurement types shared by the partitioner, transport,
//! scheduler and assembler.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UtcDateTime`] | UTC instant, exchanged with the platform as epoch milliseconds |
//! | [`TimeRange`] | Half-open `[start, end)` with `start < end` |
//! | [`BatchSpec`] | Range plus the maximum span of one request |
//! | [`Batch`] | One indexed sub-range of a partition |
//! | [`SamplingInterval`] | Nominal cadence in whole seconds |
//! | [`MeasurementQuery`] | Machine, measurement names and cadence |
//!
//! Invalid ranges and spans cannot be constructed, so partitioning a
//! [`BatchSpec`] always terminates.

mod measurement;
mod span;
mod time_range;
mod timestamp;

pub use measurement::{DataPoint, MachineId, MeasurementQuery};
pub use span::{format_span, parse_span, SamplingInterval};
pub use time_range::{partition, partition_between, Batch, BatchSpec, Partition, TimeRange};
pub use timestamp::UtcDateTime;
