use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;
use uuid::Uuid;

use fileflow_api::{create_routes, AppState};
use fileflow_core::{
    traits::LibraryFileRepository, ChannelFrame, ExecutorSnapshot, FileStatus, HelloRequest,
    Library, ProcessingNode, SystemClock,
};
use fileflow_dispatcher::{
    LeaseManager, LeaseManagerConfig, NextFileConfig, NextFileService, RunnerChannels, RunnerHub,
};
use fileflow_infrastructure::{
    FileLogStore, InMemoryLibraryFileRepository, InMemoryLibraryRepository,
    InMemoryProcessingNodeRepository,
};

struct TestApp {
    router: Router,
    state: AppState,
    files: InMemoryLibraryFileRepository,
}

fn test_app(access_token: Option<&str>) -> TestApp {
    let libraries = InMemoryLibraryRepository::new();
    let nodes = InMemoryProcessingNodeRepository::new();
    let files = InMemoryLibraryFileRepository::new();
    let clock = Arc::new(SystemClock);
    let logs = FileLogStore::new(100);

    let leases = Arc::new(LeaseManager::new(
        Arc::new(files.clone()),
        clock.clone(),
        LeaseManagerConfig::default(),
    ));
    let next_file = Arc::new(NextFileService::new(
        Arc::new(libraries.clone()),
        Arc::new(nodes.clone()),
        Arc::new(files.clone()),
        leases.clone(),
        logs.clone(),
        clock,
        NextFileConfig::default(),
    ));
    let hub = Arc::new(RunnerHub::new(leases, logs, Arc::new(RunnerChannels::new())));

    let state = AppState {
        next_file,
        hub,
        libraries: Arc::new(libraries),
        nodes: Arc::new(nodes),
        files: Arc::new(files.clone()),
        metrics: None,
        access_token: access_token.map(str::to_string),
        cors_enabled: true,
    };
    TestApp {
        router: create_routes(state.clone()),
        state,
        files,
    }
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// 登记一个节点、一个库和一个文件，返回 (节点, 文件UID)
async fn seed(app: &Router) -> (ProcessingNode, Uuid) {
    let node = ProcessingNode::new("node-1", "1.0.0");
    let (status, _) = call(
        app,
        Method::PUT,
        "/api/nodes",
        Some(serde_json::to_value(&node).unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let library = Library::new("movies");
    let (status, _) = call(
        app,
        Method::PUT,
        "/api/libraries",
        Some(serde_json::to_value(&library).unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        Method::POST,
        "/api/files",
        Some(json!({ "library_uid": library.uid, "name": "a.mkv", "size": 1024 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let file_uid: Uuid = serde_json::from_value(body["data"]["uid"].clone()).unwrap();
    (node, file_uid)
}

fn next_file_body(node: &ProcessingNode, runner_uid: Uuid) -> Value {
    json!({ "node_uid": node.uid, "node_version": "1.0.0", "runner_uid": runner_uid })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app(Some("secret"));
    let (status, body) = call(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_access_token_required() {
    let app = test_app(Some("secret"));
    let (status, body) = call(&app.router, Method::GET, "/api/runners", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app.router, Method::GET, "/api/runners", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        call(&app.router, Method::GET, "/api/runners", None, Some("secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_invalid_library_is_rejected() {
    let app = test_app(None);
    let mut library = serde_json::to_value(Library::new("broken")).unwrap();
    library["detect_file_size"] = json!({ "range": "Between", "lower": 100, "upper": null });
    let (status, body) = call(&app.router, Method::PUT, "/api/libraries", Some(library), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "CONFIGURATION_ERROR");

    let mut library = serde_json::to_value(Library::new("bad-schedule")).unwrap();
    library["schedule"] = json!("10x");
    let (status, _) = call(&app.router, Method::PUT, "/api/libraries", Some(library), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = call(&app.router, Method::GET, "/api/libraries", None, None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_unknown_node_gets_status_not_error() {
    let app = test_app(None);
    let node = ProcessingNode::new("ghost", "1.0.0");
    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/node/next-file",
        Some(next_file_body(&node, Uuid::new_v4())),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "NodeNotFound");
    assert_eq!(body["data"]["file"], Value::Null);
}

#[tokio::test]
async fn test_claim_heartbeat_log_and_complete() {
    let app = test_app(None);
    let (node, file_uid) = seed(&app.router).await;
    let runner_uid = Uuid::new_v4();

    let (_, preview) = call(
        &app.router,
        Method::POST,
        "/api/node/next-file/preview",
        Some(json!({ "node_uid": node.uid })),
        None,
    )
    .await;
    assert_eq!(preview["data"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/node/next-file",
        Some(next_file_body(&node, runner_uid)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Success");
    assert_eq!(body["data"]["file"]["uid"], json!(file_uid));

    // 另一个runner领不到同一个文件
    let (_, body) = call(
        &app.router,
        Method::POST,
        "/api/node/next-file",
        Some(next_file_body(&node, Uuid::new_v4())),
        None,
    )
    .await;
    assert_eq!(body["data"]["status"], "NoFile");

    let (_, body) = call(
        &app.router,
        Method::POST,
        "/api/runner/hello",
        Some(json!({
            "runner_uid": runner_uid,
            "snapshot": { "current_step": 1, "current_step_name": "scan", "progress": 10.0 }
        })),
        None,
    )
    .await;
    assert_eq!(body["data"]["continue"], true);

    let (_, runners) = call(&app.router, Method::GET, "/api/runners", None, None).await;
    assert_eq!(runners["data"][0]["current_step_name"], "scan");

    let (status, _) = call(
        &app.router,
        Method::POST,
        "/api/runner/log",
        Some(json!({ "runner_uid": runner_uid, "line": "encoding" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app.router,
        Method::POST,
        "/api/runner/complete",
        Some(json!({ "runner_uid": runner_uid, "status": "Processed", "message": "done" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, log) = call(
        &app.router,
        Method::GET,
        &format!("/api/files/{file_uid}/log"),
        None,
        None,
    )
    .await;
    assert_eq!(log["data"], json!(["encoding", "done"]));

    let file = app.files.get_by_id(file_uid).await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Processed);

    // 完成后心跳被拒绝
    let (_, body) = call(
        &app.router,
        Method::POST,
        "/api/runner/hello",
        Some(json!({ "runner_uid": runner_uid })),
        None,
    )
    .await;
    assert_eq!(body["data"]["continue"], false);
}

#[tokio::test]
async fn test_log_from_unknown_runner_is_not_found() {
    let app = test_app(None);
    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/runner/log",
        Some(json!({ "runner_uid": Uuid::new_v4(), "line": "x" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "RUNNER_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_file_requeues() {
    let app = test_app(None);
    let (node, file_uid) = seed(&app.router).await;
    let runner_uid = Uuid::new_v4();
    call(
        &app.router,
        Method::POST,
        "/api/node/next-file",
        Some(next_file_body(&node, runner_uid)),
        None,
    )
    .await;

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/files/{file_uid}/cancel"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cancelled"], true);

    let file = app.files.get_by_id(file_uid).await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Unprocessed);

    let (_, body) = call(
        &app.router,
        Method::POST,
        &format!("/api/files/{file_uid}/cancel"),
        None,
        None,
    )
    .await;
    assert_eq!(body["data"]["cancelled"], false);
}

#[tokio::test]
async fn test_channel_carries_hello_and_cancel() {
    let app = test_app(None);
    let (node, file_uid) = seed(&app.router).await;
    let runner_uid = Uuid::new_v4();
    call(
        &app.router,
        Method::POST,
        "/api/node/next-file",
        Some(next_file_body(&node, runner_uid)),
        None,
    )
    .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let url = format!("ws://{addr}/api/runner/{runner_uid}/channel");
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let hello = ChannelFrame::Hello(HelloRequest {
        runner_uid,
        snapshot: ExecutorSnapshot::default(),
    });
    stream
        .send(Message::text(serde_json::to_string(&hello).unwrap()))
        .await
        .unwrap();

    let frame = next_frame(&mut stream).await;
    assert!(matches!(frame, ChannelFrame::HelloAck(ack) if ack.continue_processing));

    assert!(app.state.hub.cancel_file(file_uid, "用户取消").await.unwrap());
    let frame = next_frame(&mut stream).await;
    assert_eq!(
        frame,
        ChannelFrame::Cancel {
            reason: "用户取消".to_string()
        }
    );
}

#[tokio::test]
async fn test_channel_requires_live_lease() {
    let app = test_app(None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let url = format!("ws://{addr}/api/runner/{}/channel", Uuid::new_v4());
    assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
}

async fn next_frame<S>(stream: &mut S) -> ChannelFrame
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}
