mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use quicktodo::ops::{Session, SessionOptions};
use quicktodo::viewer::{router, Hub, HubHandle, ViewerState};
use serde_json::{json, Value};
use support::TestEnv;
use tower::ServiceExt;

struct Viewer {
    app: Router,
    hub: HubHandle,
}

fn viewer(env: &TestEnv, with_current: bool) -> Viewer {
    let hub = Hub::spawn();
    let session =
        Session::with_sink(env.config(), SessionOptions::default(), Arc::new(hub.clone()))
            .expect("session");
    session
        .init_project(Some("demo"), &env.project_dir("demo"), None)
        .expect("init");
    let current = with_current.then(|| session.project_by_name("demo").expect("entry"));
    Viewer {
        app: router(ViewerState::new(session, hub.clone(), current)),
        hub,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let env = TestEnv::new();
    let Viewer { app, .. } = viewer(&env, false);

    let (status, created) = send(
        &app,
        "POST",
        "/api/projects/demo/tasks",
        Some(json!({ "title": "Fix login bug", "priority": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], 1);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["priority"], "high");

    let (status, task) = send(&app, "GET", "/api/projects/demo/tasks/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["title"], "Fix login bug");

    let (status, updated) = send(
        &app,
        "PUT",
        "/api/projects/demo/tasks/1",
        Some(json!({ "status": "in_progress", "assigned_to": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "in_progress");
    assert_eq!(updated["assigned_to"], "alice");
    assert_eq!(updated["title"], "Fix login bug");

    let (status, cleared) = send(
        &app,
        "PUT",
        "/api/projects/demo/tasks/1",
        Some(json!({ "assigned_to": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared.get("assigned_to").is_none());

    let (status, _) = send(&app, "DELETE", "/api/projects/demo/tasks/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", "/api/projects/demo/tasks/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Task not found"));
}

#[tokio::test]
async fn list_applies_query_filters() {
    let env = TestEnv::new();
    let Viewer { app, .. } = viewer(&env, false);
    for (title, priority) in [("a", "high"), ("b", "low"), ("c", "high")] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/projects/demo/tasks",
            Some(json!({ "title": title, "priority": priority })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, all) = send(&app, "GET", "/api/projects/demo/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (_, high) = send(&app, "GET", "/api/projects/demo/tasks?priority=high", None).await;
    let titles: Vec<_> = high
        .as_array()
        .unwrap()
        .iter()
        .map(|task| task["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["a", "c"]);

    let (_, projects) = send(&app, "GET", "/api/projects", None).await;
    assert_eq!(projects[0]["name"], "demo");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let env = TestEnv::new();
    let Viewer { app, .. } = viewer(&env, false);

    let (status, body) = send(&app, "GET", "/api/projects/ghost/tasks", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/projects/demo/tasks",
        Some(json!({ "title": "x", "priority": "urgent" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/projects/demo/tasks",
        Some(json!({ "title": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/projects/demo/tasks/99",
        Some(json!({ "status": "done" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/projects/demo/tasks?status=blocked", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn current_project_reflects_startup_directory() {
    let env = TestEnv::new();
    let Viewer { app, .. } = viewer(&env, true);
    let (status, body) = send(&app, "GET", "/api/current-project", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_current_project"], true);
    assert_eq!(body["current_project"]["name"], "demo");

    let other = TestEnv::new();
    let Viewer { app, .. } = viewer(&other, false);
    let (_, body) = send(&app, "GET", "/api/current-project", None).await;
    assert_eq!(body["has_current_project"], false);
    assert!(body["current_project"].is_null());
}

#[tokio::test]
async fn edits_and_posted_notifications_are_broadcast() {
    let env = TestEnv::new();
    let Viewer { app, hub } = viewer(&env, false);
    let (_id, mut queue) = hub.register();
    for _ in 0..100 {
        if hub.client_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send(
        &app,
        "POST",
        "/api/projects/demo/tasks",
        Some(json!({ "title": "Broadcast me" })),
    )
    .await;
    let message = tokio::time::timeout(Duration::from_secs(5), queue.recv())
        .await
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_str(&message).unwrap();
    assert_eq!(event["type"], "task_created");
    assert_eq!(event["data"]["title"], "Broadcast me");

    let (status, _) = send(
        &app,
        "POST",
        "/api/notify",
        Some(json!({
            "type": "task_deleted",
            "data": { "id": 5, "title": "gone" },
            "project": "demo",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let message = tokio::time::timeout(Duration::from_secs(5), queue.recv())
        .await
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_str(&message).unwrap();
    assert_eq!(event["type"], "task_deleted");
    assert_eq!(event["data"]["id"], 5);
}

#[tokio::test]
async fn board_page_is_served_at_root() {
    let env = TestEnv::new();
    let Viewer { app, .. } = viewer(&env, false);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("/api/projects"));
    assert!(page.contains("/ws"));
}
