use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue, Method, StatusCode, header};

use crate::clock::{Clock, ManualClock};
use crate::error::{Error, ErrorCode, TransportErrorKind};
use crate::metrics::PipelineMetrics;
use crate::response::Response;
use crate::util::{
    bounded_retry_delay, deadline_exceeded_error, join_base_path, lock_unpoisoned, merge_headers,
    redact_uri_for_logs, remaining_attempt_timeout, resolve_uri, truncate_body,
};

#[test]
fn join_base_path_handles_slashes() {
    assert_eq!(
        join_base_path("http://orders.internal:8080/v1/", "/orders"),
        "http://orders.internal:8080/v1/orders"
    );
}

#[test]
fn join_base_path_handles_empty_path() {
    assert_eq!(
        join_base_path("http://orders.internal:8080", ""),
        "http://orders.internal:8080"
    );
}

#[test]
fn resolve_uri_joins_relative_path() {
    let (uri_text, uri) = resolve_uri("http://orders.internal:8080", "/v1/orders/42")
        .expect("relative path should resolve");
    assert_eq!(uri_text, "http://orders.internal:8080/v1/orders/42");
    assert_eq!(uri.path(), "/v1/orders/42");
}

#[test]
fn resolve_uri_rejects_unparseable_path() {
    let error = resolve_uri("http://orders.internal:8080", "/v1/bad path")
        .expect_err("path with a space should be rejected");
    match error {
        Error::InvalidUri { uri } => {
            assert_eq!(uri, "http://orders.internal:8080/v1/bad path");
        }
        other => panic!("unexpected error variant: {other}"),
    }
}

#[test]
fn redact_uri_for_logs_strips_query_and_fragment() {
    assert_eq!(
        redact_uri_for_logs("http://orders.internal:8080/v1/orders?token=secret#section"),
        "http://orders.internal:8080/v1/orders"
    );
}

#[test]
fn truncate_body_keeps_short_bodies() {
    assert_eq!(truncate_body(b"not found"), "not found");
}

#[test]
fn truncate_body_caps_long_bodies() {
    let body = vec![b'a'; 5000];
    let text = truncate_body(&body);
    assert!(text.ends_with("...(truncated)"));
    assert!(text.len() < body.len());
}

#[test]
fn remaining_attempt_timeout_without_deadline_returns_attempt_timeout() {
    let attempt_timeout = Duration::from_secs(30);
    assert_eq!(
        remaining_attempt_timeout(attempt_timeout, None, Instant::now()),
        Some(attempt_timeout)
    );
}

#[test]
fn remaining_attempt_timeout_caps_at_remaining_deadline() {
    let capped = remaining_attempt_timeout(
        Duration::from_secs(30),
        Some(Duration::from_secs(10)),
        Instant::now(),
    )
    .expect("deadline should not be exhausted yet");
    assert!(capped <= Duration::from_secs(10));
    assert!(capped > Duration::from_secs(9));
}

#[test]
fn remaining_attempt_timeout_expired_deadline_returns_none() {
    let call_started_at = Instant::now() - Duration::from_millis(50);
    assert_eq!(
        remaining_attempt_timeout(
            Duration::from_secs(30),
            Some(Duration::from_millis(10)),
            call_started_at,
        ),
        None
    );
}

#[test]
fn bounded_retry_delay_without_deadline_passes_through() {
    let retry_delay = Duration::from_millis(250);
    assert_eq!(
        bounded_retry_delay(retry_delay, None, Instant::now()),
        Some(retry_delay)
    );
}

#[test]
fn bounded_retry_delay_rejects_delay_crossing_deadline() {
    assert_eq!(
        bounded_retry_delay(
            Duration::from_millis(250),
            Some(Duration::from_millis(100)),
            Instant::now(),
        ),
        None
    );
}

#[test]
fn bounded_retry_delay_allows_delay_inside_deadline() {
    assert_eq!(
        bounded_retry_delay(
            Duration::from_millis(10),
            Some(Duration::from_secs(10)),
            Instant::now(),
        ),
        Some(Duration::from_millis(10))
    );
}

#[test]
fn deadline_exceeded_error_reports_deadline_millis() {
    let error = deadline_exceeded_error(
        Some(Duration::from_millis(1500)),
        &Method::GET,
        "http://orders.internal:8080/v1/orders",
    );
    match error {
        Error::DeadlineExceeded { timeout_ms, .. } => assert_eq!(timeout_ms, 1500),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[test]
fn merge_headers_request_value_overrides_default() {
    let mut defaults = HeaderMap::new();
    defaults.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    defaults.insert(header::USER_AGENT, HeaderValue::from_static("egress"));

    let mut request_headers = HeaderMap::new();
    request_headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

    let merged = merge_headers(&defaults, &request_headers);
    assert_eq!(
        merged.get(header::ACCEPT),
        Some(&HeaderValue::from_static("text/plain"))
    );
    assert_eq!(
        merged.get(header::USER_AGENT),
        Some(&HeaderValue::from_static("egress"))
    );
}

#[test]
fn lock_unpoisoned_recovers_after_panic() {
    let shared = Arc::new(Mutex::new(7_u32));
    let poisoner = Arc::clone(&shared);
    let result = thread::spawn(move || {
        let _guard = poisoner.lock().unwrap();
        panic!("poison the mutex");
    })
    .join();
    assert!(result.is_err());
    assert!(shared.lock().is_err());

    assert_eq!(*lock_unpoisoned(&shared), 7);
}

#[test]
fn error_codes_are_stable() {
    let timeout = Error::Timeout {
        timeout_ms: 30_000,
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
    };
    assert_eq!(timeout.code(), ErrorCode::Timeout);
    assert_eq!(timeout.code().as_str(), "timeout");

    let transport = Error::Transport {
        kind: TransportErrorKind::Connect,
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
        source: "connection refused".into(),
    };
    assert_eq!(transport.code(), ErrorCode::Transport);
    assert_eq!(transport.code().as_str(), "transport");

    let rejected = Error::CircuitOpen {
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
        retry_after_ms: 15_000,
    };
    assert_eq!(rejected.code(), ErrorCode::CircuitOpen);
    assert_eq!(rejected.code().as_str(), "circuit_open");
}

#[test]
fn circuit_open_error_display_names_target() {
    let error = Error::CircuitOpen {
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
        retry_after_ms: 12_000,
    };
    assert_eq!(
        error.to_string(),
        "circuit breaker is open for GET http://orders.internal:8080/v1/orders; retry after 12000ms"
    );
}

#[test]
fn manual_clock_advances_on_demand() {
    let clock = ManualClock::new();
    let before = clock.now();
    clock.advance(Duration::from_secs(5));
    assert_eq!(clock.now() - before, Duration::from_secs(5));
}

#[test]
fn metrics_count_successful_call() {
    let metrics = PipelineMetrics::default();
    metrics.record_call_started();
    let in_flight = metrics.enter_in_flight();
    assert_eq!(metrics.snapshot().in_flight, 1);

    metrics.record_attempt();
    let result: crate::Result<Response> = Ok(Response::new(StatusCode::OK, HeaderMap::new(), "ok"));
    metrics.record_call_completed(&result, Duration::from_millis(10));
    drop(in_flight);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.calls_started, 1);
    assert_eq!(snapshot.calls_succeeded, 1);
    assert_eq!(snapshot.calls_failed, 0);
    assert_eq!(snapshot.attempts, 1);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.latency_samples, 1);
    assert!((snapshot.latency_avg_ms - 10.0).abs() < f64::EPSILON);
    assert_eq!(snapshot.status_counts.get(&200), Some(&1));
}

#[test]
fn metrics_separate_rejected_from_failed() {
    let metrics = PipelineMetrics::default();

    let rejected: crate::Result<Response> = Err(Error::CircuitOpen {
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
        retry_after_ms: 15_000,
    });
    metrics.record_call_completed(&rejected, Duration::from_millis(1));

    let failed: crate::Result<Response> = Err(Error::HttpStatus {
        status: 503,
        method: Method::GET,
        uri: "http://orders.internal:8080/v1/orders".to_owned(),
        body: "unavailable".to_owned(),
    });
    metrics.record_call_completed(&failed, Duration::from_millis(2));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.calls_rejected, 1);
    assert_eq!(snapshot.calls_failed, 1);
    assert_eq!(snapshot.http_status_errors, 1);
    assert_eq!(snapshot.error_counts.get("circuit_open"), Some(&1));
    assert_eq!(snapshot.error_counts.get("http_status:503"), Some(&1));
    assert_eq!(snapshot.status_counts.get(&503), Some(&1));
}
