//! In-process fake of the M2V platform used by the behavior tests.
//!
//! The fake sits behind the `HttpClient` seam, so the real token manager,
//! retry loop, scheduler and assembler run unchanged.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use m2v_core::api::{HISTORICAL_DATA_ROUTE, TOKEN_ROUTE};
use m2v_core::{
    HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, M2vClient, MachineId,
    MeasurementQuery, RetryPolicy, SamplingInterval, Settings, TimeRange, UtcDateTime,
};
use serde_json::{json, Value};

pub const BASE_URL: &str = "https://m2v.test";
pub const DAY_MS: i64 = 86_400_000;
pub const JAN_1_2025_MS: i64 = 1_735_689_600_000;

/// One historical data request as the fake platform saw it.
#[derive(Debug, Clone)]
pub struct DataCall {
    pub start: i64,
    pub end: i64,
    pub names: Vec<String>,
    pub interval_in_s: u64,
    pub authorization: Option<String>,
    /// 1 for the first request covering `start`, 2 for its first retry, ...
    pub attempt: usize,
}

type Responder = dyn Fn(&DataCall) -> Result<HttpResponse, HttpError> + Send + Sync;
type Latency = dyn Fn(&DataCall) -> Duration + Send + Sync;

pub struct FakePlatform {
    token_statuses: Vec<u16>,
    token_lifetimes: Vec<u64>,
    token_calls: AtomicUsize,
    data_calls: Mutex<Vec<DataCall>>,
    other_requests: Mutex<Vec<HttpRequest>>,
    other_responses: BTreeMap<String, String>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Box<Latency>,
    responder: Box<Responder>,
}

impl FakePlatform {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&DataCall) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    {
        Self {
            token_statuses: vec![200],
            token_lifetimes: vec![3600],
            token_calls: AtomicUsize::new(0),
            data_calls: Mutex::new(Vec::new()),
            other_requests: Mutex::new(Vec::new()),
            other_responses: BTreeMap::new(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            latency: Box::new(|_| Duration::from_millis(2)),
            responder: Box::new(responder),
        }
    }

    /// Every batch answers with one sample of `name` at the batch start.
    pub fn one_sample_per_batch(name: &'static str) -> Self {
        Self::new(move |call| Ok(series_response(name, &[(call.start, 1.0)])))
    }

    pub fn with_token_status(mut self, status: u16) -> Self {
        self.token_statuses = vec![status];
        self
    }

    /// Statuses of successive token exchanges; the last one repeats.
    pub fn with_token_statuses(mut self, statuses: &[u16]) -> Self {
        self.token_statuses = statuses.to_vec();
        self
    }

    /// Lifetimes handed out by successive token exchanges; the last one repeats.
    pub fn with_token_lifetimes(mut self, lifetimes: &[u64]) -> Self {
        self.token_lifetimes = lifetimes.to_vec();
        self
    }

    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&DataCall) -> Duration + Send + Sync + 'static,
    {
        self.latency = Box::new(latency);
        self
    }

    /// Canned body for a non-data route (matched on the URL path, query ignored).
    pub fn with_route(mut self, route: &str, body: Value) -> Self {
        self.other_responses.insert(route.to_owned(), body.to_string());
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> Vec<DataCall> {
        self.data_calls.lock().expect("lock").clone()
    }

    pub fn other_requests(&self) -> Vec<HttpRequest> {
        self.other_requests.lock().expect("lock").clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn token_response(&self) -> HttpResponse {
        let call = self.token_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .token_statuses
            .get(call)
            .or(self.token_statuses.last())
            .copied()
            .unwrap_or(200);
        if status != 200 {
            return HttpResponse::new(
                status,
                r#"{"error":"invalid_grant","error_description":"Bad credentials"}"#,
            );
        }
        let lifetime = self
            .token_lifetimes
            .get(call)
            .or(self.token_lifetimes.last())
            .copied()
            .unwrap_or(3600);
        HttpResponse::ok_json(
            json!({
                "access_token": format!("token-{}", call + 1),
                "token_type": "bearer",
                "expires_in": lifetime,
            })
            .to_string(),
        )
    }

    fn record_data_call(&self, request: &HttpRequest) -> DataCall {
        let body: Value = request
            .body
            .as_deref()
            .map(|body| serde_json::from_str(body).expect("data request body is json"))
            .unwrap_or(Value::Null);
        let start = body["start"].as_i64().expect("start millis");
        let mut calls = self.data_calls.lock().expect("lock");
        let call = DataCall {
            start,
            end: body["end"].as_i64().expect("end millis"),
            names: body["values"]
                .as_array()
                .expect("values array")
                .iter()
                .filter_map(|name| name.as_str().map(str::to_owned))
                .collect(),
            interval_in_s: body["intervalInS"].as_u64().expect("interval"),
            authorization: request.headers.get("authorization").cloned(),
            attempt: calls.iter().filter(|call| call.start == start).count() + 1,
        };
        calls.push(call.clone());
        call
    }
}

impl HttpClient for FakePlatform {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            if request.url.ends_with(TOKEN_ROUTE) {
                tokio::time::sleep(Duration::from_millis(5)).await;
                return Ok(self.token_response());
            }

            if request.url.ends_with(HISTORICAL_DATA_ROUTE) {
                let call = self.record_data_call(&request);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep((self.latency)(&call)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return (self.responder)(&call);
            }

            self.other_requests.lock().expect("lock").push(request.clone());
            let path = request
                .url
                .trim_start_matches(BASE_URL)
                .split('?')
                .next()
                .unwrap_or_default()
                .to_owned();
            Ok(self
                .other_responses
                .get(&path)
                .map(|body| HttpResponse::ok_json(body.clone()))
                .unwrap_or_else(|| HttpResponse::new(404, "not found")))
        })
    }
}

/// Historical data body with one series.
pub fn series_response(name: &str, points: &[(i64, f64)]) -> HttpResponse {
    let values: Vec<Value> = points
        .iter()
        .map(|(timestamp, value)| json!({"timestamp": timestamp, "value": value}))
        .collect();
    HttpResponse::ok_json(
        json!({
            "results": [{"dataDefinitionKeyItemName": name, "values": values}]
        })
        .to_string(),
    )
}

pub fn settings() -> Settings {
    Settings::new(BASE_URL, "user@example.com", "password", "client-id", "client-secret")
        .with_retry(RetryPolicy::fixed(Duration::from_millis(1), 3))
}

pub fn client(platform: &Arc<FakePlatform>) -> M2vClient {
    M2vClient::with_http_client(settings(), Arc::clone(platform) as Arc<dyn HttpClient>)
}

pub fn ts(millis: i64) -> UtcDateTime {
    UtcDateTime::from_unix_millis(millis).expect("valid timestamp")
}

pub fn days(from_day: i64, to_day: i64) -> TimeRange {
    TimeRange::new(
        ts(JAN_1_2025_MS + from_day * DAY_MS),
        ts(JAN_1_2025_MS + to_day * DAY_MS),
    )
    .expect("valid range")
}

pub fn query(names: &[&str]) -> MeasurementQuery {
    MeasurementQuery::new(
        MachineId::parse("2f1d6a4e-machine").expect("valid machine"),
        names.iter().copied(),
        SamplingInterval::from_secs(3600).expect("valid interval"),
    )
    .expect("valid query")
}
