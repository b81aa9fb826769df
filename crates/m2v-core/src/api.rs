//! Platform routes and wire formats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{DataPoint, MachineId, MeasurementQuery, TimeRange, UtcDateTime};
use crate::error::RequestError;

pub const TOKEN_ROUTE: &str = "/backend/oauth/token";
pub const USER_INFO_ROUTE: &str = "/backend/user-controller/meGUI";
pub const ROUTERS_ROUTE: &str = "/backend/thing-gui-controller/filter";
pub const MACHINES_ROUTE: &str = "/backend/machine-gui-controller/filter";
pub const HISTORICAL_DATA_ROUTE: &str = "/machine-controller/postDataByRangeAndInterval";
pub const SETPOINT_ROUTE: &str = "/backend/data-definition-key-item-controller/set-point";

pub fn machine_measurements_route(machine: &MachineId) -> String {
    format!(
        "/backend/machine-controller/{}/measurements",
        urlencoding::encode(machine.as_str())
    )
}

pub fn machine_setpoints_route(machine: &MachineId) -> String {
    format!(
        "/backend/machine-controller/{}/set-points",
        urlencoding::encode(machine.as_str())
    )
}

/// Measurement name to its samples, ordered by timestamp.
pub type SeriesPayload = BTreeMap<String, Vec<DataPoint>>;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    300
}

/// Body of the historical data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataRequest<'a> {
    pub condition: &'a str,
    pub values: &'a [String],
    pub start: i64,
    pub end: i64,
    pub machine_uuid: &'a str,
    pub interval_in_s: u64,
}

impl<'a> HistoricalDataRequest<'a> {
    pub fn new(query: &'a MeasurementQuery, range: &TimeRange) -> Self {
        Self {
            condition: "",
            values: query.names(),
            start: range.start().unix_millis(),
            end: range.end().unix_millis(),
            machine_uuid: query.machine().as_str(),
            interval_in_s: query.interval().whole_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HistoricalDataResponse {
    #[serde(default)]
    results: Vec<SeriesResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesResult {
    data_definition_key_item_name: String,
    #[serde(default)]
    values: Vec<RawPoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPoint {
    timestamp: i64,
    #[serde(default)]
    value: Option<RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl RawValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Decodes a historical data body into per-measurement series.
///
/// `null` samples are dropped. A sample that is neither numeric nor `null`
/// makes the whole body malformed.
pub fn parse_series(body: &str) -> Result<SeriesPayload, RequestError> {
    let response: HistoricalDataResponse = serde_json::from_str(body).map_err(|error| {
        RequestError::permanent(format!(
            "malformed historical data body ({} bytes): {error}",
            body.len()
        ))
    })?;

    let mut payload = SeriesPayload::new();
    for series in response.results {
        let mut points = Vec::with_capacity(series.values.len());
        for raw in series.values {
            let Some(value) = raw.value else { continue };
            let value = value.as_f64().ok_or_else(|| {
                RequestError::permanent(format!(
                    "non-numeric sample for '{}' at {} ms",
                    series.data_definition_key_item_name, raw.timestamp
                ))
            })?;
            let ts = UtcDateTime::from_unix_millis(raw.timestamp)
                .map_err(|error| RequestError::permanent(error.to_string()))?;
            points.push(DataPoint { ts, value });
        }
        points.sort_by_key(|point| point.ts);
        payload
            .entry(series.data_definition_key_item_name)
            .or_default()
            .extend(points);
    }

    Ok(payload)
}

/// Paging and filtering parameters for listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: String,
    pub order: String,
    pub filter: String,
}

impl PageRequest {
    /// Defaults for routers and machines: sorted by name, ascending.
    pub fn by_name() -> Self {
        Self {
            page: 0,
            size: 10,
            sort: String::from("name"),
            order: String::from("asc"),
            filter: String::from("__archived:false"),
        }
    }

    /// Defaults for measurements and set points: most recently updated first.
    pub fn recently_updated() -> Self {
        Self {
            sort: String::from("updatedAt"),
            order: String::from("desc"),
            ..Self::by_name()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn query_string(&self) -> String {
        format!(
            "page={}&size={}&sort={}&order={}&filter={}",
            self.page,
            self.size,
            urlencoding::encode(&self.sort),
            urlencoding::encode(&self.order),
            urlencoding::encode(&self.filter)
        )
    }
}

/// One page of a listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub entities: Vec<T>,
    #[serde(default, alias = "totalElements", skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Machine entry as listed by the platform; unknown fields are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Measurement definition attached to a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Command written to a machine set point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointCommand {
    pub data_definition_key_item_uuid: String,
    pub machine_uuid: String,
    pub set_point_value: String,
    pub timestamp: i64,
}
