use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::info;

use crate::api::{
    self, Machine, Measurement, Page, PageRequest, SeriesPayload, SetpointCommand,
    MACHINES_ROUTE, ROUTERS_ROUTE, SETPOINT_ROUTE, USER_INFO_ROUTE,
};
use crate::assembler::{assemble, FetchReport};
use crate::config::Settings;
use crate::domain::{format_span, BatchSpec, MachineId, MeasurementQuery, TimeRange};
use crate::error::{FetchError, RequestError, RequestErrorKind, ValidationError};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::scheduler::{BatchScheduler, Progress, ProgressEvent};
use crate::transport::{AuthenticatedTransport, FetchOutcome};

/// Parameters of one batched fetch.
///
/// Unset options fall back to the client's [`Settings`].
#[derive(Debug, Clone)]
pub struct RangeRequest {
    query: MeasurementQuery,
    range: TimeRange,
    max_batch_span: Option<time::Duration>,
    concurrency: Option<usize>,
    progress: Progress,
    deadline: Option<Duration>,
}

impl RangeRequest {
    pub fn new(query: MeasurementQuery, range: TimeRange) -> Self {
        Self {
            query,
            range,
            max_batch_span: None,
            concurrency: None,
            progress: Progress::Disabled,
            deadline: None,
        }
    }

    pub fn with_max_batch_span(mut self, span: time::Duration) -> Self {
        self.max_batch_span = Some(span);
        self
    }

    /// In-flight cap for this call. The client-wide cap still applies.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Logs one event per finished batch when `enabled`.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = Progress::enabled(enabled);
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Progress::callback(callback);
        self
    }

    /// Time budget for the whole call, measured from the moment it starts.
    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    pub fn query(&self) -> &MeasurementQuery {
        &self.query
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

/// Client for one platform account.
///
/// The credential, the request throttle and the concurrency permits belong
/// to this instance; separate clients never share them.
#[derive(Debug)]
pub struct M2vClient {
    settings: Settings,
    transport: Arc<AuthenticatedTransport>,
    scheduler: BatchScheduler,
}

impl M2vClient {
    pub fn new(settings: Settings) -> Self {
        Self::with_http_client(settings, Arc::new(ReqwestHttpClient::default()))
    }

    pub fn with_http_client(settings: Settings, http: Arc<dyn HttpClient>) -> Self {
        let transport = Arc::new(AuthenticatedTransport::new(&settings, http));
        let scheduler = BatchScheduler::new(transport.clone(), settings.max_concurrency);
        Self {
            settings,
            transport,
            scheduler,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of token exchanges this client has sent.
    pub fn token_exchanges(&self) -> u64 {
        self.transport.tokens().exchange_count()
    }

    /// Partitions the range, fetches every batch and merges the results.
    ///
    /// Validation and authentication problems abort before any data request
    /// is sent. A credential rejected later stops the run and fails the call.
    /// Other failed batches are listed in the report; only when every batch
    /// fails does the call return an error.
    pub async fn fetch_range(&self, request: RangeRequest) -> Result<FetchReport, FetchError> {
        let started = Instant::now();
        let RangeRequest {
            query,
            range,
            max_batch_span,
            concurrency,
            progress,
            deadline,
        } = request;

        let spec = BatchSpec::new(range, max_batch_span.unwrap_or(self.settings.max_batch_span))?;
        let concurrency = match concurrency {
            Some(limit) => NonZeroUsize::new(limit).ok_or(ValidationError::ZeroConcurrency)?,
            None => self.settings.max_concurrency,
        };

        self.transport
            .authenticate()
            .await
            .map_err(authentication_failure)?;

        let batches: Vec<_> = spec.batches().collect();
        info!(
            machine = %query.machine(),
            measurements = query.names().len(),
            range = %range,
            batch_span = %format_span(spec.max_span()),
            batches = batches.len(),
            "fetching range"
        );

        let columns = query.names().to_vec();
        let interval = query.interval();
        let outcomes = self
            .scheduler
            .run(
                batches,
                Arc::new(query),
                concurrency,
                deadline.map(|budget| started + budget),
                &progress,
            )
            .await;

        if let Some(error) = outcomes.iter().find_map(|outcome| match outcome {
            FetchOutcome::Failure { error, .. }
                if error.kind() == RequestErrorKind::Authentication =>
            {
                Some(error)
            }
            _ => None,
        }) {
            return Err(FetchError::Authentication(error.to_string()));
        }

        let report = assemble(outcomes, &columns, interval)?;
        info!(
            rows = report.table.len(),
            failed_batches = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "range fetched"
        );
        Ok(report)
    }

    /// One unpartitioned historical data request.
    pub async fn historical_data(
        &self,
        query: &MeasurementQuery,
        range: &TimeRange,
    ) -> Result<SeriesPayload, FetchError> {
        Ok(self.transport.fetch_series(query, range).await?)
    }

    pub async fn user_info(&self) -> Result<Value, FetchError> {
        Ok(self.transport.get_json(USER_INFO_ROUTE).await?)
    }

    pub async fn routers(&self, page: &PageRequest) -> Result<Page<Value>, FetchError> {
        self.get_page(ROUTERS_ROUTE, page).await
    }

    pub async fn machines(&self, page: &PageRequest) -> Result<Page<Machine>, FetchError> {
        self.get_page(MACHINES_ROUTE, page).await
    }

    pub async fn machine_measurements(
        &self,
        machine: &MachineId,
        page: &PageRequest,
    ) -> Result<Page<Measurement>, FetchError> {
        self.get_page(&api::machine_measurements_route(machine), page)
            .await
    }

    pub async fn machine_setpoints(
        &self,
        machine: &MachineId,
        page: &PageRequest,
    ) -> Result<Page<Value>, FetchError> {
        self.get_page(&api::machine_setpoints_route(machine), page)
            .await
    }

    pub async fn send_setpoint(&self, command: &SetpointCommand) -> Result<Value, FetchError> {
        Ok(self.transport.post_json(SETPOINT_ROUTE, command).await?)
    }

    /// Looks a machine up by its exact display name.
    pub async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, FetchError> {
        let page = PageRequest::by_name()
            .with_size(100)
            .with_filter(format!("name:{name},__archived:false"));
        let machines = self.machines(&page).await?;
        Ok(machines
            .entities
            .into_iter()
            .find(|machine| machine.name == name))
    }

    async fn get_page<T>(&self, route: &str, page: &PageRequest) -> Result<Page<T>, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let route = format!("{route}?{}", page.query_string());
        Ok(self.transport.get_json(&route).await?)
    }
}

fn authentication_failure(error: RequestError) -> FetchError {
    match error.kind() {
        RequestErrorKind::Authentication => FetchError::Authentication(error.to_string()),
        _ => FetchError::Request(error),
    }
}
