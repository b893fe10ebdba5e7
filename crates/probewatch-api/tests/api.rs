//! API integration tests for probewatch-api routes.
//!
//! Requests go straight to the router through `tower::ServiceExt`; the
//! probed endpoints are wiremock servers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use probewatch_api::app::build_app;
use probewatch_api::state::AppState;
use probewatch_core::{
    AuthError, AuthToken, Authenticator, EndpointDefinition, HttpProber, Registry,
    RegistrySource, Scheduler, SchedulerConfig,
};

struct FixedAuth;

#[async_trait]
impl Authenticator for FixedAuth {
    async fn authenticate(&self) -> Result<AuthToken, AuthError> {
        Ok(AuthToken::new("tok-api"))
    }
}

fn def(unique_id: &str, url: &str, endpoint: &str) -> EndpointDefinition {
    EndpointDefinition {
        unique_id: unique_id.to_string(),
        url: url.to_string(),
        method: "GET".to_string(),
        endpoint: endpoint.to_string(),
        request_body: String::new(),
        content_type: "application/json".to_string(),
    }
}

fn scheduler(definitions: Vec<EndpointDefinition>) -> Arc<Scheduler> {
    let registry: Registry = definitions.into_iter().collect();
    let sources: Vec<Arc<dyn RegistrySource>> = vec![Arc::new(registry)];
    let config = SchedulerConfig::default().with_request_timeout(2_000);
    let prober = HttpProber::from_config(&config).unwrap();
    Arc::new(Scheduler::new(
        config,
        sources,
        Arc::new(FixedAuth),
        Arc::new(prober),
    ))
}

fn app(scheduler: Arc<Scheduler>) -> axum::Router {
    build_app(AppState::new(scheduler))
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(b) = body {
        builder.body(Body::from(serde_json::to_vec(&b).unwrap())).unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    }
}

#[tokio::test]
async fn health_returns_ok() {
    let resp = app(scheduler(vec![])).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "ok");
}

#[tokio::test]
async fn metrics_returns_openmetrics() {
    let resp = app(scheduler(vec![])).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(ct.contains("openmetrics-text"));
    let text = body_text(resp.into_body()).await;
    assert!(text.contains("probewatch_scheduler_state{state=\"idle\"} 1"));
    assert!(text.contains("probewatch_sweeps_total 0"));
    assert!(text.trim_end().ends_with("# EOF"));
}

#[tokio::test]
async fn metrics_include_per_url_health_after_sweep() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scheduler = scheduler(vec![def("svc", &server.uri(), "up")]);
    scheduler.run_sweep().await.unwrap();

    let resp = app(scheduler).oneshot(get("/metrics")).await.unwrap();
    let text = body_text(resp.into_body()).await;
    let url = format!("{}/up", server.uri());
    assert!(text.contains("probewatch_sweeps_total 1"));
    assert!(text.contains("probewatch_probes_total 1"));
    assert!(text.contains(&format!("probewatch_endpoint_down{{url=\"{}\"}} 0", url)));
    assert!(text.contains(&format!("probewatch_last_success_timestamp_seconds{{url=\"{}\"}}", url)));
}

#[tokio::test]
async fn metrics_escape_quotes_in_url_labels() {
    let server = MockServer::start().await;
    let scheduler = scheduler(vec![]);

    let resp = app(Arc::clone(&scheduler))
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(serde_json::to_value(def("quoted", &server.uri(), r#"a"b"#)).unwrap()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resp = app(scheduler).oneshot(get("/metrics")).await.unwrap();
    let text = body_text(resp.into_body()).await;
    let escaped = format!(r#"probewatch_endpoint_down{{url="{}/a\"b"}} 0"#, server.uri());
    assert!(text.contains(&escaped), "{}", text);
    assert!(!text.contains(r#"/a"b"#));
}

#[tokio::test]
async fn list_endpoints_returns_merged_registry() {
    let scheduler = scheduler(vec![
        def("alpha", "http://alpha.internal", "health"),
        def("beta", "http://beta.internal", "status"),
    ]);
    let resp = app(scheduler).oneshot(get("/api/v1/endpoints")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["alpha"]["url"], "http://alpha.internal");
    assert_eq!(body["beta"]["endpoint"], "status");
    assert_eq!(body["beta"]["contentType"], "application/json");
}

#[tokio::test]
async fn ad_hoc_probe_mirrors_upstream_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let resp = app(scheduler(vec![]))
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(json!({
                "uniqueId": "adhoc",
                "url": server.uri(),
                "method": "POST",
                "endpoint": "echo",
                "requestBody": "{\"ping\":true}",
                "contentType": "application/json"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "pong");
}

#[tokio::test]
async fn ad_hoc_probe_uses_cached_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "tok-api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .mount(&server)
        .await;

    let scheduler = scheduler(vec![]);
    scheduler.tokens().store(AuthToken::new("tok-api")).await;

    let resp = app(scheduler)
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(serde_json::to_value(def("adhoc", &server.uri(), "secure")).unwrap()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "secret");
}

#[tokio::test]
async fn ad_hoc_probe_failure_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resp = app(scheduler(vec![]))
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(serde_json::to_value(def("adhoc", &server.uri(), "broken")).unwrap()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "internal_error");
    assert!(body["message"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn ad_hoc_probe_rejects_invalid_definition() {
    let resp = app(scheduler(vec![]))
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(json!({
                "uniqueId": "adhoc",
                "url": "not a url",
                "method": "GET",
                "endpoint": "health",
                "contentType": "application/json"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn ad_hoc_probe_rejects_missing_unique_id() {
    let resp = app(scheduler(vec![]))
        .oneshot(json_request(
            "POST",
            "/api/v1/probe",
            Some(json!({
                "url": "http://svc.internal",
                "method": "GET",
                "endpoint": "health",
                "contentType": "application/json"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn trigger_sweep_reports_each_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let scheduler = scheduler(vec![
        def("good", &server.uri(), "up"),
        def("bad", &server.uri(), "down"),
    ]);
    let resp = app(Arc::clone(&scheduler))
        .oneshot(json_request("POST", "/api/v1/sweep", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["token_refreshed"], true);
    assert_eq!(body["up"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["down"], 0);
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);

    assert_eq!(scheduler.tokens().current().await.unwrap().value(), "tok-api");
}

#[tokio::test]
async fn status_reports_config_and_tracked_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scheduler = scheduler(vec![def("svc", &server.uri(), "up")]);
    scheduler.run_sweep().await.unwrap();

    let resp = app(scheduler).oneshot(get("/api/v1/status")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["sweeping"], false);
    assert_eq!(body["sweep_interval_ms"], 60_000);
    assert_eq!(body["down_threshold_ms"], 18_000_000);
    assert_eq!(body["stats"]["sweeps_completed"], 1);
    assert!(body["last_sweep"].is_string());
    let endpoints = body["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0]["full_url"], format!("{}/up", server.uri()));
    assert_eq!(endpoints[0]["down"], false);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let resp = app(scheduler(vec![]))
        .oneshot(get("/api/v1/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("/api/v1/nope"));
}

#[tokio::test]
async fn overlapping_sweep_trigger_is_409() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(500)))
        .mount(&server)
        .await;

    let scheduler = scheduler(vec![def("slow", &server.uri(), "slow")]);
    let running = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_sweep().await })
    };
    while !scheduler.is_sweeping() {
        tokio::task::yield_now().await;
    }

    let resp = app(Arc::clone(&scheduler))
        .oneshot(json_request("POST", "/api/v1/sweep", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "conflict");

    assert!(running.await.unwrap().is_ok());
    assert_eq!(scheduler.stats().sweeps_skipped, 1);
}
