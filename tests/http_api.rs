// tests/http_api.rs

mod common;
use crate::common::builders::ConfigFileBuilder;
use crate::common::fake_backend::{Script, ScriptedBackend};
use crate::common::{init_tracing, wait_for_state, with_timeout};

use std::error::Error;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use jobwarden::api::JobService;
use jobwarden::http;
use jobwarden::types::{JobId, JobState};

type TestResult = Result<(), Box<dyn Error>>;

fn service(backend: ScriptedBackend) -> Arc<JobService> {
    Arc::new(JobService::with_backend(
        ConfigFileBuilder::new().build(),
        Arc::new(backend),
    ))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn create_get_and_list_a_job() -> TestResult {
    init_tracing();
    let backend = ScriptedBackend::new().with_script("build.sh", Script::stdout_then_exit(&["ok"], 0));
    let service = service(backend);
    let app = http::router(service.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/jobs",
        Some(json!({"kind": "build", "program": "build.sh", "args": ["--release"]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id: JobId = json_body(&body)["job_id"].as_str().unwrap().parse()?;

    with_timeout(wait_for_state(&service, id, JobState::Completed)).await;

    let (status, body) = send(&app, Method::GET, &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = json_body(&body);
    assert_eq!(snapshot["id"], json!(id.to_string()));
    assert_eq!(snapshot["kind"], "build");
    assert_eq!(snapshot["state"], "Completed");
    assert_eq!(snapshot["exit_code"], 0);
    assert!(snapshot["error"].is_null());
    assert!(snapshot["started_at"].is_string());

    let (status, body) = send(&app, Method::GET, "/jobs?state=completed&kind=build", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().map(Vec::len), Some(1));

    let (status, body) = send(&app, Method::GET, "/jobs?kind=launch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!([]));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn delete_cancels_and_is_idempotent() -> TestResult {
    init_tracing();
    let backend = ScriptedBackend::new().with_script("server", Script::hang());
    let service = service(backend);
    let app = http::router(service.clone());

    let (_, body) = send(
        &app,
        Method::POST,
        "/jobs",
        Some(json!({"kind": "launch", "program": "server"})),
    )
    .await;
    let id: JobId = json_body(&body)["job_id"].as_str().unwrap().parse()?;
    with_timeout(wait_for_state(&service, id, JobState::Running)).await;

    let (status, _) = send(&app, Method::DELETE, &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    with_timeout(wait_for_state(&service, id, JobState::Cancelled)).await;

    let (status, body) = send(&app, Method::DELETE, &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = json_body(&body);
    assert_eq!(snapshot["state"], "Cancelled");
    assert!(snapshot["exit_code"].is_null());

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn events_stream_replays_a_finished_job() -> TestResult {
    init_tracing();
    let backend =
        ScriptedBackend::new().with_script("echo", Script::stdout_then_exit(&["hello", "world"], 0));
    let service = service(backend);
    let app = http::router(service.clone());

    let (_, body) = send(&app, Method::POST, "/jobs", Some(json!({"program": "echo"}))).await;
    let id: JobId = json_body(&body)["job_id"].as_str().unwrap().parse()?;
    with_timeout(wait_for_state(&service, id, JobState::Completed)).await;

    let (status, body) = with_timeout(send(&app, Method::GET, &format!("/jobs/{id}/events"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body)?;
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    let logs: Vec<_> = events
        .iter()
        .filter(|e| e["type"] == "log")
        .map(|e| (e["seq"].as_u64().unwrap(), e["line"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(logs, vec![(0, "hello".to_string()), (1, "world".to_string())]);
    assert_eq!(events.first().map(|e| e["type"].clone()), Some(json!("status")));
    assert_eq!(events.last(), Some(&json!({"type": "status", "state": "Completed"})));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn errors_map_to_status_codes() -> TestResult {
    init_tracing();
    let service = service(ScriptedBackend::new());
    let app = http::router(service.clone());

    let missing = JobId::new();
    let (status, body) = send(&app, Method::GET, &format!("/jobs/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["error"].as_str().is_some());

    let (status, _) = send(&app, Method::GET, "/jobs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, &format!("/jobs/{missing}/events"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::POST, "/jobs", Some(json!({"program": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"].as_str().is_some());

    let (status, _) = send(&app, Method::GET, "/jobs?state=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    service.shutdown().await?;

    let (status, _) = send(&app, Method::POST, "/jobs", Some(json!({"program": "echo"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
