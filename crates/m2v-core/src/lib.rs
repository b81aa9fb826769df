//! Batched, gap-aware time-series retrieval for the Eurogard M2V platform.
//!
//! This crate contains:
//! - Time-range partitioning and measurement query models
//! - An authenticated transport with single-flight token refresh and retry
//! - A bounded concurrent batch scheduler
//! - The assembler that merges batches into one ordered table
//! - The platform endpoints used around a fetch (machines, measurements, ...)
//!
//! # Fetch Pipeline
//!
//! ```text
//! RangeRequest ──► BatchSpec ──► BatchScheduler ──► AuthenticatedTransport ──► platform
//!                  (partition)   (JoinSet + permits)  (token, retry, throttle)
//!                                      │
//!                                      ▼
//!                            Vec<FetchOutcome> ──► assemble ──► FetchReport
//! ```
//!
//! | Stage | Fails the call when | Otherwise |
//! |-------|---------------------|-----------|
//! | Partition | range or span is invalid | lazy, contiguous sub-ranges |
//! | Authenticate | token exchange is rejected | credential shared by all batches |
//! | Schedule | never | one outcome per batch, in batch order |
//! | Assemble | every batch failed | table, failures, completeness, gaps |

pub mod api;
pub mod assembler;
pub mod auth;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod scheduler;
pub mod throttling;
pub mod transport;

pub use api::{Machine, Measurement, Page, PageRequest, SeriesPayload, SetpointCommand};
pub use assembler::{assemble, Completeness, FailureReport, FetchReport, Gap, ResultTable, Row};
pub use auth::TokenManager;
pub use client::{M2vClient, RangeRequest};
pub use config::{PasswordGrant, Settings};
pub use domain::{
    format_span, parse_span, partition, partition_between, Batch, BatchSpec, DataPoint,
    MachineId, MeasurementQuery, Partition, SamplingInterval, TimeRange, UtcDateTime,
};
pub use error::{FetchError, RequestError, RequestErrorKind, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpFuture, HttpMethod, HttpRequest,
    HttpResponse, ReqwestHttpClient,
};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{BatchScheduler, Progress, ProgressEvent};
pub use throttling::RequestThrottle;
pub use transport::{AuthenticatedTransport, BatchFetcher, FetchFuture, FetchOutcome};
