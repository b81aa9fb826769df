//! Authenticated, retrying access to the platform.
//!
//! Every failure is classified once, here. Per-batch fetches never return
//! `Err`: they resolve to a [`FetchOutcome`] so sibling batches keep going.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::api::{self, HistoricalDataRequest, SeriesPayload, HISTORICAL_DATA_ROUTE};
use crate::auth::TokenManager;
use crate::config::Settings;
use crate::domain::{Batch, MeasurementQuery, TimeRange};
use crate::error::RequestError;
use crate::http_client::{HttpAuth, HttpClient, HttpErrorKind, HttpRequest, HttpResponse};
use crate::retry::{classify_status, RetryPolicy, StatusClass};
use crate::throttling::RequestThrottle;

/// Characters of a response body that may appear in logs and error messages.
pub const BODY_PREVIEW_CHARS: usize = 256;

/// Result of fetching one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success { batch: Batch, payload: SeriesPayload },
    Failure { batch: Batch, error: RequestError },
}

impl FetchOutcome {
    pub fn batch(&self) -> Batch {
        match self {
            Self::Success { batch, .. } | Self::Failure { batch, .. } => *batch,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Boxed future returned by [`BatchFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>>;

/// Fetches one batch. The scheduler only ever talks to this seam.
pub trait BatchFetcher: Send + Sync {
    fn fetch<'a>(&'a self, batch: Batch, query: &'a MeasurementQuery) -> FetchFuture<'a>;
}

/// Runs one exchange under the request's own timeout and maps transport errors.
pub(crate) async fn execute_once(
    http: &dyn HttpClient,
    request: HttpRequest,
) -> Result<HttpResponse, RequestError> {
    let timeout = request.timeout;
    match tokio::time::timeout(timeout, http.execute(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(error)) => {
            let reason = match error.kind() {
                HttpErrorKind::Timeout => "request timed out",
                HttpErrorKind::Connect => "connection failed",
                HttpErrorKind::Body => "response body could not be read",
                HttpErrorKind::Other => "request failed",
            };
            Err(RequestError::transient(format!("{reason}: {}", error.message())))
        }
        Err(_) => Err(RequestError::transient(format!(
            "request timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// HTTP access with bearer authentication, retry and optional rate limiting.
pub struct AuthenticatedTransport {
    http: Arc<dyn HttpClient>,
    tokens: TokenManager,
    base_url: String,
    retry: RetryPolicy,
    request_timeout: Duration,
    throttle: Option<RequestThrottle>,
}

impl AuthenticatedTransport {
    pub fn new(settings: &Settings, http: Arc<dyn HttpClient>) -> Self {
        Self {
            tokens: TokenManager::new(settings, Arc::clone(&http)),
            http,
            base_url: settings.base_url.clone(),
            retry: settings.retry.clone(),
            request_timeout: settings.request_timeout,
            throttle: RequestThrottle::from_setting(settings.requests_per_second),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Makes sure a usable credential is held before any batch is dispatched.
    pub async fn authenticate(&self) -> Result<(), RequestError> {
        self.tokens.bearer().await.map(|_| ())
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    /// Sends the request built by `build` until it succeeds or fails for good.
    ///
    /// `build` is called once per attempt. A 401 discards the token and the
    /// request is repeated once with a fresh one; a second 401 is final.
    pub async fn send<F>(&self, build: F) -> Result<HttpResponse, RequestError>
    where
        F: Fn() -> HttpRequest + Send + Sync,
    {
        self.send_counted(build).await.map(|(response, _)| response)
    }

    async fn send_counted<F>(&self, build: F) -> Result<(HttpResponse, u32), RequestError>
    where
        F: Fn() -> HttpRequest + Send + Sync,
    {
        let mut attempts = 0;
        let mut reauthenticated = false;
        loop {
            attempts += 1;
            let token = self
                .tokens
                .bearer()
                .await
                .map_err(|error| error.with_attempts(attempts))?;

            if let Some(throttle) = &self.throttle {
                throttle.until_ready().await;
            }

            let request = build()
                .with_auth(&HttpAuth::BearerToken(token.clone()))
                .with_timeout(self.request_timeout);
            debug!(attempt = attempts, url = %request.url, "sending platform request");

            let error = match execute_once(self.http.as_ref(), request).await {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => return Ok((response, attempts)),
                    StatusClass::Unauthorized => {
                        self.tokens.invalidate(&token).await;
                        if reauthenticated {
                            return Err(RequestError::authentication(
                                "bearer token rejected after re-authentication",
                            )
                            .with_status(response.status)
                            .with_attempts(attempts));
                        }
                        reauthenticated = true;
                        info!(attempt = attempts, "bearer token rejected, re-authenticating");
                        continue;
                    }
                    StatusClass::Transient => {
                        RequestError::transient(format!(
                            "platform returned status {}",
                            response.status
                        ))
                        .with_status(response.status)
                    }
                    StatusClass::Permanent => {
                        return Err(RequestError::permanent(format!(
                            "platform rejected request: {}",
                            response.body_preview(BODY_PREVIEW_CHARS)
                        ))
                        .with_status(response.status)
                        .with_attempts(attempts));
                    }
                },
                Err(error) => error,
            };

            if !self.retry.allows_retry(attempts) {
                return Err(error.with_attempts(attempts));
            }
            let delay = self.retry.delay_after(attempts);
            info!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %error,
                "retrying platform request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `GET` a route and decode its JSON body.
    pub async fn get_json<T>(&self, route: &str) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(route);
        let response = self.send(|| HttpRequest::get(url.clone())).await?;
        decode(&response)
    }

    /// `POST` a JSON body to a route. An empty response body decodes to `null`.
    pub async fn post_json<B>(&self, route: &str, body: &B) -> Result<Value, RequestError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(route);
        let body = serde_json::to_string(body).map_err(|error| {
            RequestError::permanent(format!("request body could not be encoded: {error}"))
        })?;
        let response = self
            .send(|| HttpRequest::post(url.clone()).with_json_body(body.clone()))
            .await?;
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        decode(&response)
    }

    /// One historical data request for `range`, without partitioning.
    pub async fn fetch_series(
        &self,
        query: &MeasurementQuery,
        range: &TimeRange,
    ) -> Result<SeriesPayload, RequestError> {
        let url = self.url(HISTORICAL_DATA_ROUTE);
        let body = serde_json::to_string(&HistoricalDataRequest::new(query, range)).map_err(
            |error| RequestError::permanent(format!("request body could not be encoded: {error}")),
        )?;

        let (response, attempts) = self
            .send_counted(|| HttpRequest::post(url.clone()).with_json_body(body.clone()))
            .await?;

        let mut payload = api::parse_series(&response.body).map_err(|parse_error| {
            error!(
                status = response.status,
                size = response.body.len(),
                preview = %response.body_preview(BODY_PREVIEW_CHARS),
                range = %range,
                "malformed historical data response"
            );
            parse_error.with_status(response.status).with_attempts(attempts)
        })?;

        payload.retain(|name, _| {
            let requested = query.names().iter().any(|wanted| wanted == name);
            if !requested {
                debug!(measurement = %name, "ignoring unrequested measurement in response");
            }
            requested
        });
        Ok(payload)
    }
}

impl BatchFetcher for AuthenticatedTransport {
    fn fetch<'a>(&'a self, batch: Batch, query: &'a MeasurementQuery) -> FetchFuture<'a> {
        Box::pin(async move {
            match self.fetch_series(query, &batch.range).await {
                Ok(payload) => FetchOutcome::Success { batch, payload },
                Err(error) => {
                    warn!(
                        batch = batch.index,
                        range = %batch.range,
                        code = error.code(),
                        attempts = error.attempts(),
                        "batch failed: {}",
                        error.message()
                    );
                    FetchOutcome::Failure { batch, error }
                }
            }
        })
    }
}

fn decode<T>(response: &HttpResponse) -> Result<T, RequestError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(&response.body).map_err(|parse_error| {
        error!(
            status = response.status,
            size = response.body.len(),
            preview = %response.body_preview(BODY_PREVIEW_CHARS),
            "malformed platform response"
        );
        RequestError::permanent(format!(
            "malformed response body ({} bytes): {parse_error}",
            response.body.len()
        ))
        .with_status(response.status)
    })
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("throttle", &self.throttle)
            .field("tokens", &self.tokens)
            .finish()
    }
}
