//! Behavior-driven tests for batched range fetches
//!
//! These tests verify HOW a multi-batch fetch behaves end to end: how the
//! range is split, how failures are contained and reported, and how the
//! credential and concurrency limits are shared between batches.

mod support;

use std::sync::Arc;
use std::time::Duration;

use m2v_core::{
    FetchError, HttpError, HttpResponse, RangeRequest, RequestErrorKind, TimeRange,
    ValidationError,
};
use support::{client, days, query, series_response, ts, FakePlatform, DAY_MS, JAN_1_2025_MS};

fn day(n: i64) -> i64 {
    JAN_1_2025_MS + n * DAY_MS
}

// =============================================================================
// Partitioning and ordering
// =============================================================================

#[tokio::test]
async fn when_two_days_are_fetched_in_one_day_batches_system_returns_two_ordered_rows() {
    // Given: A platform answering one sample at the start of every batch
    let platform = FakePlatform::one_sample_per_batch("temperature").into_shared();
    let client = client(&platform);

    // When: 2025-01-01T00:00Z .. 2025-01-03T00:00Z is fetched with a 1D span
    let request = RangeRequest::new(query(&["temperature"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("fetch succeeds");

    // Then: Exactly two requests cover the two days, and two rows come back in order
    let mut ranges: Vec<_> = platform
        .data_calls()
        .iter()
        .map(|call| (call.start, call.end))
        .collect();
    ranges.sort_unstable();
    assert_eq!(ranges, vec![(day(0), day(1)), (day(1), day(2))]);

    let timestamps: Vec<_> = report.table.rows().iter().map(|row| row.timestamp).collect();
    assert_eq!(timestamps, vec![ts(day(0)), ts(day(1))]);
    assert_eq!(report.table.columns(), &["temperature"]);
    assert_eq!(report.batches, 2);
    assert!(report.is_complete());
}

#[tokio::test]
async fn when_batches_complete_out_of_order_system_still_returns_rows_in_time_order() {
    // Given: Earlier batches answer slower than later ones
    let platform = FakePlatform::one_sample_per_batch("pressure")
        .with_latency(|call| {
            let position = (call.start - JAN_1_2025_MS) / DAY_MS;
            Duration::from_millis(60 - 10 * position as u64)
        })
        .into_shared();
    let client = client(&platform);

    // When: Five daily batches run concurrently
    let request = RangeRequest::new(query(&["pressure"]), days(0, 5))
        .with_max_batch_span(time::Duration::days(1))
        .with_concurrency(5);
    let report = client.fetch_range(request).await.expect("fetch succeeds");

    // Then: Row order follows timestamps, not completion order
    let timestamps: Vec<_> = report.table.rows().iter().map(|row| row.timestamp).collect();
    let expected: Vec<_> = (0..5).map(|n| ts(day(n))).collect();
    assert_eq!(timestamps, expected);
}

#[tokio::test]
async fn when_adjacent_batches_both_report_the_boundary_system_keeps_one_row_from_the_later_batch() {
    // Given: Each batch answers samples at both of its edges, tagged with its own start day
    let platform = FakePlatform::new(|call| {
        let tag = ((call.start - JAN_1_2025_MS) / DAY_MS) as f64;
        Ok(series_response("level", &[(call.start, tag), (call.end, tag)]))
    })
    .into_shared();
    let client = client(&platform);

    // When: Two adjacent days are fetched
    let request = RangeRequest::new(query(&["level"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("fetch succeeds");

    // Then: The shared boundary appears once, with the value from batch 1
    assert_eq!(report.table.len(), 3);
    assert_eq!(report.table.value(ts(day(1)), "level"), Some(1.0));
    assert_eq!(report.table.value(ts(day(0)), "level"), Some(0.0));
    assert_eq!(report.table.value(ts(day(2)), "level"), Some(1.0));
}

#[tokio::test]
async fn when_a_measurement_is_missing_from_some_batches_system_keeps_the_column_with_absent_values() {
    // Given: Only the first day reports `flow`; every day reports `temp`
    let platform = FakePlatform::new(|call| {
        let body = if call.start == day(0) {
            serde_json::json!({"results": [
                {"dataDefinitionKeyItemName": "temp", "values": [{"timestamp": call.start, "value": 20.0}]},
                {"dataDefinitionKeyItemName": "flow", "values": [{"timestamp": call.start, "value": 3.5}]},
            ]})
        } else {
            serde_json::json!({"results": [
                {"dataDefinitionKeyItemName": "temp", "values": [{"timestamp": call.start, "value": 21.0}]},
                {"dataDefinitionKeyItemName": "flow", "values": [{"timestamp": call.start, "value": null}]},
            ]})
        };
        Ok(HttpResponse::ok_json(body.to_string()))
    })
    .into_shared();
    let client = client(&platform);

    // When: Two days are fetched
    let request = RangeRequest::new(query(&["temp", "flow"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("fetch succeeds");

    // Then: Both columns exist and the second row marks `flow` as absent
    assert_eq!(report.table.columns(), &["temp", "flow"]);
    assert_eq!(report.table.rows()[0].values, vec![Some(20.0), Some(3.5)]);
    assert_eq!(report.table.rows()[1].values, vec![Some(21.0), None]);
}

// =============================================================================
// Failure containment
// =============================================================================

#[tokio::test]
async fn when_the_third_of_five_batches_fails_permanently_system_returns_the_rest_and_names_the_gap() {
    // Given: The platform rejects the third day with a 400
    let platform = FakePlatform::new(|call| {
        if call.start == day(2) {
            Ok(HttpResponse::new(400, r#"{"message":"invalid range"}"#))
        } else {
            Ok(series_response("temp", &[(call.start, 1.0)]))
        }
    })
    .into_shared();
    let client = client(&platform);

    // When: Five days are fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 5))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("partial result");

    // Then: Rows for days 1, 2, 4 and 5 are present and the failure names day 3 only
    let timestamps: Vec<_> = report.table.rows().iter().map(|row| row.timestamp).collect();
    assert_eq!(timestamps, vec![ts(day(0)), ts(day(1)), ts(day(3)), ts(day(4))]);

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.index, 2);
    assert_eq!(failure.range, days(2, 3));
    assert_eq!(failure.kind, RequestErrorKind::Permanent);
    assert_eq!(failure.status, Some(400));
    assert_eq!(failure.attempts, 1, "permanent failures are not retried");
    assert!(!report.is_complete());
}

#[tokio::test]
async fn when_every_batch_fails_system_returns_an_aggregate_error_instead_of_an_empty_table() {
    // Given: The platform rejects every data request
    let platform = FakePlatform::new(|_| Ok(HttpResponse::new(422, "unprocessable"))).into_shared();
    let client = client(&platform);

    // When: Three days are fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 3))
        .with_max_batch_span(time::Duration::days(1));
    let error = client.fetch_range(request).await.expect_err("all batches failed");

    // Then: The error lists every failed batch
    match error {
        FetchError::AllBatchesFailed { failures } => {
            let indexes: Vec<_> = failures.iter().map(|failure| failure.index).collect();
            assert_eq!(indexes, vec![0, 1, 2]);
        }
        other => panic!("expected AllBatchesFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn when_the_platform_is_briefly_unavailable_system_retries_and_succeeds() {
    // Given: Every batch first sees a 503, then a connection reset, then data
    let platform = FakePlatform::new(|call| match call.attempt {
        1 => Ok(HttpResponse::new(503, "maintenance")),
        2 => Err(HttpError::connect("connection reset by peer")),
        _ => Ok(series_response("temp", &[(call.start, 5.0)])),
    })
    .into_shared();
    let client = client(&platform);

    // When: Two days are fetched with the default three-attempt test policy
    let request = RangeRequest::new(query(&["temp"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("retries recover");

    // Then: Both batches succeed after three attempts each
    assert!(report.is_complete());
    assert_eq!(report.table.len(), 2);
    assert_eq!(platform.data_calls().len(), 6);
}

#[tokio::test]
async fn when_retries_are_exhausted_system_reports_a_transient_failure_with_attempt_count() {
    // Given: The second day is permanently overloaded
    let platform = FakePlatform::new(|call| {
        if call.start == day(1) {
            Ok(HttpResponse::new(429, "slow down"))
        } else {
            Ok(series_response("temp", &[(call.start, 1.0)]))
        }
    })
    .into_shared();
    let client = client(&platform);

    // When: Two days are fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("partial result");

    // Then: The second batch failed as transient after the attempt ceiling
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, RequestErrorKind::Transient);
    assert_eq!(report.failures[0].attempts, 3);
    assert_eq!(report.failures[0].code, "request.transient");
}

#[tokio::test]
async fn when_a_response_body_is_malformed_system_fails_that_batch_without_retrying() {
    // Given: The first day returns an HTML error page with status 200
    let platform = FakePlatform::new(|call| {
        if call.start == day(0) {
            Ok(HttpResponse::ok_json(format!(
                "<html><body>{}</body></html>",
                "proxy error ".repeat(5_000)
            )))
        } else {
            Ok(series_response("temp", &[(call.start, 1.0)]))
        }
    })
    .into_shared();
    let client = client(&platform);

    // When: Two days are fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 2))
        .with_max_batch_span(time::Duration::days(1));
    let report = client.fetch_range(request).await.expect("partial result");

    // Then: The malformed batch is a permanent failure with a bounded message
    let failure = &report.failures[0];
    assert_eq!(failure.range, days(0, 1));
    assert_eq!(failure.kind, RequestErrorKind::Permanent);
    assert!(failure.message.len() < 512, "message must not embed the whole body");
    let first_day_calls = platform
        .data_calls()
        .iter()
        .filter(|call| call.start == day(0))
        .count();
    assert_eq!(first_day_calls, 1);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn when_the_token_exchange_is_rejected_system_fails_before_requesting_any_data() {
    // Given: The token endpoint rejects the configured credentials
    let platform = FakePlatform::one_sample_per_batch("temp")
        .with_token_status(401)
        .into_shared();
    let client = client(&platform);

    // When: A range is fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 3));
    let error = client.fetch_range(request).await.expect_err("auth fails");

    // Then: The call fails with an authentication error and no data request was sent
    assert!(matches!(error, FetchError::Authentication(_)), "{error:?}");
    assert!(platform.data_calls().is_empty());
    assert_eq!(platform.token_calls(), 1, "rejected grants are not retried");
}

#[tokio::test]
async fn when_many_fetches_start_at_token_expiry_system_refreshes_exactly_once() {
    // Given: A client holding a token that is already inside its refresh margin
    let platform = FakePlatform::one_sample_per_batch("temp")
        .with_token_lifetimes(&[1, 3600])
        .into_shared();
    let client = Arc::new(client(&platform));
    let warmup = RangeRequest::new(query(&["temp"]), days(0, 1));
    client.fetch_range(warmup).await.expect("warm-up fetch");
    assert_eq!(platform.token_calls(), 1);
    tokio::time::sleep(Duration::from_millis(700)).await;

    // When: Eight single-batch fetches start at the same moment
    let mut handles = Vec::new();
    for n in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .fetch_range(RangeRequest::new(query(&["temp"]), days(n, n + 1)))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task joined").expect("fetch succeeds");
    }

    // Then: Only one refresh exchange happened and every request used the new token
    assert_eq!(platform.token_calls(), 2);
    assert_eq!(client.token_exchanges(), 2);
    let refreshed = platform
        .data_calls()
        .iter()
        .skip(1)
        .all(|call| call.authorization.as_deref() == Some("Bearer token-2"));
    assert!(refreshed);
}

#[tokio::test]
async fn when_the_credential_is_rejected_mid_run_system_stops_and_fails_the_call() {
    // Given: A one-second token, slow batches, and a token endpoint that rejects the refresh
    let platform = FakePlatform::one_sample_per_batch("temp")
        .with_token_lifetimes(&[1])
        .with_token_statuses(&[200, 400])
        .with_latency(|_| Duration::from_millis(600))
        .into_shared();
    let client = client(&platform);

    // When: Six one-day batches are fetched two at a time
    let request = RangeRequest::new(query(&["temp"]), days(0, 6)).with_concurrency(2);
    let error = client.fetch_range(request).await.expect_err("refresh rejected");

    // Then: The whole call fails with an authentication error
    assert!(matches!(error, FetchError::Authentication(_)), "{error:?}");

    // And: The rejected refresh was attempted once and no batch went out after it
    assert_eq!(platform.token_calls(), 2);
    assert_eq!(platform.data_calls().len(), 2);
}

#[tokio::test]
async fn when_a_multi_batch_fetch_starts_system_authenticates_once_for_all_batches() {
    // Given: A fresh client
    let platform = FakePlatform::one_sample_per_batch("temp").into_shared();
    let client = client(&platform);

    // When: Ten batches are fetched concurrently
    let request = RangeRequest::new(query(&["temp"]), days(0, 10))
        .with_max_batch_span(time::Duration::days(1))
        .with_concurrency(10);
    client.fetch_range(request).await.expect("fetch succeeds");

    // Then: One token exchange served every batch
    assert_eq!(platform.token_calls(), 1);
    assert_eq!(platform.data_calls().len(), 10);
}

// =============================================================================
// Concurrency and cancellation
// =============================================================================

#[tokio::test]
async fn when_concurrency_is_one_system_fetches_strictly_sequentially_with_the_same_result() {
    // Given: Two identical platforms with noticeable latency
    let sequential = FakePlatform::one_sample_per_batch("temp")
        .with_latency(|_| Duration::from_millis(10))
        .into_shared();
    let concurrent = FakePlatform::one_sample_per_batch("temp")
        .with_latency(|_| Duration::from_millis(10))
        .into_shared();

    // When: The same range is fetched with limits 1 and 4
    let request = || {
        RangeRequest::new(query(&["temp"]), days(0, 6)).with_max_batch_span(time::Duration::days(1))
    };
    let one = client(&sequential)
        .fetch_range(request().with_concurrency(1))
        .await
        .expect("sequential fetch");
    let four = client(&concurrent)
        .fetch_range(request().with_concurrency(4))
        .await
        .expect("concurrent fetch");

    // Then: Limit 1 never overlapped requests and both tables are identical
    assert_eq!(sequential.peak_in_flight(), 1);
    assert_eq!(one.table, four.table);
    let starts: Vec<_> = sequential.data_calls().iter().map(|call| call.start).collect();
    let expected: Vec<_> = (0..6).map(day).collect();
    assert_eq!(starts, expected, "sequential fetches follow batch order");
}

#[tokio::test]
async fn when_concurrency_limit_is_three_system_never_has_more_than_three_requests_in_flight() {
    // Given: A platform with latency so that requests overlap
    let platform = FakePlatform::one_sample_per_batch("temp")
        .with_latency(|_| Duration::from_millis(20))
        .into_shared();
    let client = client(&platform);

    // When: Twelve batches are fetched with a limit of three
    let request = RangeRequest::new(query(&["temp"]), days(0, 12))
        .with_max_batch_span(time::Duration::days(1))
        .with_concurrency(3);
    let report = client.fetch_range(request).await.expect("fetch succeeds");

    // Then: All batches finished and the in-flight peak stayed within the limit
    assert_eq!(report.table.len(), 12);
    assert!(platform.peak_in_flight() <= 3, "peak was {}", platform.peak_in_flight());
}

#[tokio::test]
async fn when_the_deadline_passes_system_keeps_finished_batches_and_cancels_the_rest() {
    // Given: The first day answers quickly and every later day is slow
    let platform = FakePlatform::one_sample_per_batch("temp")
        .with_latency(|call| {
            if call.start == day(0) {
                Duration::from_millis(5)
            } else {
                Duration::from_millis(2_000)
            }
        })
        .into_shared();
    let client = client(&platform);

    // When: Four days are fetched sequentially with a 300ms budget
    let request = RangeRequest::new(query(&["temp"]), days(0, 4))
        .with_max_batch_span(time::Duration::days(1))
        .with_concurrency(1)
        .with_deadline(Duration::from_millis(300));
    let report = client.fetch_range(request).await.expect("partial result");

    // Then: The first day is kept and the remaining three are reported as cancelled
    assert_eq!(report.table.len(), 1);
    assert_eq!(report.failures.len(), 3);
    assert!(report
        .failures
        .iter()
        .all(|failure| failure.kind == RequestErrorKind::Cancelled));
    let missing: Vec<TimeRange> = report.missing_ranges().collect();
    assert_eq!(missing, vec![days(1, 2), days(2, 3), days(3, 4)]);
    assert!(platform.data_calls().len() <= 2, "nothing is dispatched after the deadline");
}

#[tokio::test]
async fn when_progress_callback_is_set_system_reports_each_batch_once() {
    // Given: A progress callback collecting events
    let platform = FakePlatform::one_sample_per_batch("temp").into_shared();
    let client = client(&platform);
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    // When: Four batches are fetched
    let request = RangeRequest::new(query(&["temp"]), days(0, 4))
        .with_max_batch_span(time::Duration::days(1))
        .with_progress_callback(move |event| {
            sink.lock()
                .expect("lock")
                .push((event.completed, event.total, event.succeeded));
        });
    client.fetch_range(request).await.expect("fetch succeeds");

    // Then: Exactly four events arrived with a running count
    let events = events.lock().expect("lock").clone();
    assert_eq!(
        events,
        vec![(1, 4, true), (2, 4, true), (3, 4, true), (4, 4, true)]
    );
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn when_request_is_invalid_system_fails_before_contacting_the_platform() {
    // Given: A client and a platform that records every call
    let platform = FakePlatform::one_sample_per_batch("temp").into_shared();
    let client = client(&platform);

    // When: A zero concurrency limit and a zero batch span are requested
    let zero_concurrency = client
        .fetch_range(RangeRequest::new(query(&["temp"]), days(0, 1)).with_concurrency(0))
        .await
        .expect_err("zero concurrency");
    let zero_span = client
        .fetch_range(
            RangeRequest::new(query(&["temp"]), days(0, 1))
                .with_max_batch_span(time::Duration::ZERO),
        )
        .await
        .expect_err("zero span");

    // Then: Both are validation errors and nothing was sent
    assert!(matches!(
        zero_concurrency,
        FetchError::Validation(ValidationError::ZeroConcurrency)
    ));
    assert!(matches!(
        zero_span,
        FetchError::Validation(ValidationError::InvalidSpan { .. })
    ));
    assert_eq!(platform.token_calls(), 0);
    assert!(platform.data_calls().is_empty());
}
