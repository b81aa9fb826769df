use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::FailureReport;

/// Input validation errors. These fail fast and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("time range start {start} must be strictly before end {end}")]
    InvalidRange { start: String, end: String },
    #[error("batch span must be positive, got {nanos} ns")]
    InvalidSpan { nanos: i128 },
    #[error("sampling interval must be a positive whole number of seconds: '{value}'")]
    InvalidSamplingInterval { value: String },
    #[error("invalid duration '{value}', expected e.g. 500ms, 60s, 15min, 1h, 1D")]
    InvalidDuration { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp {millis} ms is outside the supported range")]
    TimestampOutOfRange { millis: i64 },

    #[error("at least one measurement name is required")]
    EmptyMeasurementList,
    #[error("measurement name cannot be empty")]
    EmptyMeasurementName,
    #[error("machine id cannot be empty")]
    EmptyMachineId,
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    #[error("setting '{name}' is required")]
    MissingSetting { name: &'static str },
    #[error("setting '{name}' has invalid value '{value}'")]
    InvalidSetting { name: &'static str, value: String },
}

/// Classification assigned to every request failure at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestErrorKind {
    /// Network error, timeout, 5xx or 429. Retried inside the transport.
    Transient,
    /// Non-retryable 4xx or an unparseable body.
    Permanent,
    /// The token exchange was rejected.
    Authentication,
    /// The batch was never dispatched, or was abandoned, because the deadline passed.
    Cancelled,
}

impl RequestErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Authentication => "authentication",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for RequestErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured request failure carried inside `FetchOutcome::Failure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    kind: RequestErrorKind,
    message: String,
    status: Option<u16>,
    attempts: u32,
}

impl RequestError {
    fn new(kind: RequestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            attempts: 0,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::Permanent, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::Authentication, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::Cancelled, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn kind(&self) -> RequestErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Number of attempts made before giving up. Zero when never dispatched.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn retryable(&self) -> bool {
        matches!(self.kind, RequestErrorKind::Transient)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            RequestErrorKind::Transient => "request.transient",
            RequestErrorKind::Permanent => "request.permanent",
            RequestErrorKind::Authentication => "request.authentication",
            RequestErrorKind::Cancelled => "request.cancelled",
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status}, {})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for RequestError {}

/// Top-level error for a client call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("all {} batches failed; first failure: {}", .failures.len(), first_failure(.failures))]
    AllBatchesFailed { failures: Vec<FailureReport> },

    #[error(transparent)]
    Request(#[from] RequestError),
}

fn first_failure(failures: &[FailureReport]) -> String {
    failures
        .first()
        .map(|failure| failure.message.clone())
        .unwrap_or_else(|| String::from("<none>"))
}
