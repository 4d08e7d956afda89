//! Request gate and proxy pipeline behaviour, dispatched in-process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower::ServiceExt as _;

use rapla_proxy::calendar::{Calendar, IcsSerializer, JsonSerializer};
use rapla_proxy::config::ProxyConfig;
use rapla_proxy::extract::{ExtractError, ParseError};
use rapla_proxy::http::{AppState, Format, HttpServer, X_REQUEST_ID};

mod common;

use common::{CountingExtractor, CountingSerializer, FailingSerializer, PanickingSerializer};

fn app(state: AppState) -> Router {
    HttpServer::build_router(&ProxyConfig::default(), state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_non_get_methods_never_reach_pipeline() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("x")));
    let router = app(common::state_with(extractor.clone()));

    for method in ["POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"] {
        let request = Request::builder()
            .method(method)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
    }

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("payload"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(body_bytes(response).await, b"Method not allowed");

    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_get_streams_exact_serializer_output() {
    let extractor = CountingExtractor::new(|_, key| Ok(common::sample_calendar(key.as_str())));
    let router = app(common::state_with(extractor.clone()));

    let response = router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/calendar; charset=utf-8"
    );
    let expected = common::ics_bytes(&common::sample_calendar("woo"));
    assert_eq!(body_bytes(response).await, expected);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn test_sequential_requests_are_byte_identical() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("same")));
    let router = app(common::state_with(extractor.clone()));

    let first = body_bytes(router.clone().oneshot(get("/")).await.unwrap()).await;
    let second = body_bytes(router.oneshot(get("/")).await.unwrap()).await;

    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert_eq!(extractor.calls(), 2);
}

#[tokio::test]
async fn test_extraction_failure_is_bad_gateway_without_calendar() {
    let extractor = CountingExtractor::new(|_, _| Err(ExtractError::Unreachable("connection refused".into())));
    let serializer = CountingSerializer::new(Arc::new(IcsSerializer));
    let state = common::state_with(extractor.clone()).with_serializer(Format::Ics, serializer.clone());

    let response = app(state).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("BEGIN:VCALENDAR"));
    assert!(!body.contains("connection refused"));
    assert_eq!(serializer.calls(), 0);
}

#[tokio::test]
async fn test_malformed_upstream_is_bad_gateway() {
    let extractor = CountingExtractor::new(|_, _| Err(ExtractError::Malformed(ParseError::Missing("title"))));

    let response = app(common::state_with(extractor)).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_slow_extraction_hits_deadline() {
    let extractor = CountingExtractor::slow(Duration::from_secs(5), |_, _| Ok(common::sample_calendar("late")));
    let mut state = common::state_with(extractor.clone());
    state.extract_timeout = Duration::from_millis(100);

    let response = app(state).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(extractor.calls(), 1);
    assert_eq!(extractor.completed().load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_serialization_failure_truncates_after_extraction() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("broken")));
    let failing = Arc::new(FailingSerializer {
        extractions_done: extractor.completed(),
        seen_at_start: AtomicUsize::new(usize::MAX),
    });
    let state = common::state_with(extractor.clone()).with_serializer(Format::Ics, failing.clone());

    let response = app(state).oneshot(get("/")).await.unwrap();

    // Headers were already committed when serialization started.
    assert_eq!(response.status(), StatusCode::OK);
    let result = axum::body::to_bytes(response.into_body(), usize::MAX).await;
    assert!(result.is_err());

    assert_eq!(extractor.calls(), 1);
    assert_eq!(failing.seen_at_start.load(Ordering::SeqCst), 1);
}

async fn wait_for_metric(handle: &PrometheusHandle, line: &str) -> bool {
    for _ in 0..50 {
        if handle.render().contains(line) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_serializer_panic_fails_the_body() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("panic")));
    let state = common::state_with(extractor).with_serializer(Format::Ics, Arc::new(PanickingSerializer));

    let response = app(state).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = axum::body::to_bytes(response.into_body(), usize::MAX).await;
    assert!(result.is_err());

    assert!(wait_for_metric(&handle, "proxy_serialization_failures_total 1").await);
}

#[tokio::test]
async fn test_rejected_requests_are_counted() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("x")));
    let router = app(common::state_with(extractor));

    let post = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    assert_eq!(router.clone().oneshot(post).await.unwrap().status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        router.clone().oneshot(get("/?format=xml")).await.unwrap().status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(router.clone().oneshot(get("/other.ics")).await.unwrap().status(), StatusCode::NOT_FOUND);
    body_bytes(router.oneshot(get("/")).await.unwrap()).await;

    let rendered = handle.render();
    assert!(rendered.contains(r#"proxy_requests_total{method="POST",status="405"} 1"#), "{rendered}");
    assert!(rendered.contains(r#"proxy_requests_total{method="GET",status="400"} 1"#), "{rendered}");
    assert!(rendered.contains(r#"proxy_requests_total{method="GET",status="404"} 1"#), "{rendered}");
    assert!(rendered.contains(r#"proxy_requests_total{method="GET",status="200"} 1"#), "{rendered}");
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    const N: usize = 50;

    let extractor = CountingExtractor::new(|n, _| Ok(common::sample_calendar(&format!("cal-{n}"))));
    let serializer = CountingSerializer::new(Arc::new(IcsSerializer));
    let state = common::state_with(extractor.clone()).with_serializer(Format::Ics, serializer.clone());
    let router = app(state);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..N {
        let router = router.clone();
        tasks.spawn(async move {
            let response = router.oneshot(get("/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            String::from_utf8(body_bytes(response).await).unwrap()
        });
    }

    let mut names = Vec::new();
    while let Some(body) = tasks.join_next().await {
        let body = body.unwrap();
        assert_eq!(body.matches("PRODID:").count(), 1);

        let name = body
            .lines()
            .find_map(|line| line.strip_prefix("PRODID:"))
            .unwrap()
            .to_string();
        assert!(body.contains(&format!("SUMMARY:Lecture {name}\r\n")));
        assert_eq!(body.as_bytes(), common::ics_bytes(&common::sample_calendar(&name)).as_slice());
        names.push(name);
    }

    names.sort();
    names.dedup();
    assert_eq!(names.len(), N);
    assert_eq!(extractor.calls(), N);
    assert_eq!(serializer.calls(), N);
}

#[tokio::test]
async fn test_json_format() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("json")));
    let router = app(common::state_with(extractor));

    let response = router.oneshot(get("/?format=json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let calendar: Calendar = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(calendar, common::sample_calendar("json"));
}

#[tokio::test]
async fn test_json_serializer_can_be_replaced() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("json")));
    let serializer = CountingSerializer::new(Arc::new(JsonSerializer));
    let state = common::state_with(extractor).with_serializer(Format::Json, serializer.clone());

    let response = app(state).oneshot(get("/?format=json")).await.unwrap();
    body_bytes(response).await;

    assert_eq!(serializer.calls(), 1);
}

#[tokio::test]
async fn test_unknown_format_is_rejected_before_extraction() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("x")));
    let router = app(common::state_with(extractor.clone()));

    let response = router.oneshot(get("/?format=xml")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_other_paths_are_not_found() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("x")));
    let router = app(common::state_with(extractor.clone()));

    let response = router.oneshot(get("/other.ics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_response_carries_request_id() {
    let extractor = CountingExtractor::new(|_, _| Ok(common::sample_calendar("x")));
    let router = app(common::state_with(extractor));

    let request = Request::builder()
        .uri("/")
        .header(X_REQUEST_ID, "req-42")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.headers()[X_REQUEST_ID], "req-42");
}
