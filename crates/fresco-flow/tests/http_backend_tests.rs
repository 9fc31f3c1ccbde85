//! HTTP execution backend tests against a local executor.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use fresco_core::SubmissionId;
use fresco_flow::asset::AssetKey;
use fresco_flow::backend::http::HttpBackend;
use fresco_flow::backend::{ExecutionBackend, SubmissionRequest};
use fresco_flow::error::Error;

#[derive(Clone, Copy)]
enum ServerMode {
    /// Acknowledge with an external run reference.
    Acknowledge,
    /// Answer 503 to the first request, then acknowledge.
    UnavailableOnce,
    /// Always answer with `status`.
    Fail { status: StatusCode },
    /// Sleep before acknowledging.
    DelayResponse { millis: u64 },
}

#[derive(Clone)]
struct ServerState {
    mode: ServerMode,
    hits: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<SubmissionRequest>>>,
}

async fn submit_handler(
    State(state): State<ServerState>,
    Json(request): Json<SubmissionRequest>,
) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    state.received.lock().unwrap().push(request);

    match state.mode {
        ServerMode::Acknowledge => {
            (StatusCode::OK, Json(json!({ "externalRef": "run-42" }))).into_response()
        }
        ServerMode::UnavailableOnce if hit == 1 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        ServerMode::UnavailableOnce => StatusCode::OK.into_response(),
        ServerMode::Fail { status } => (status, "executor is down").into_response(),
        ServerMode::DelayResponse { millis } => {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            StatusCode::OK.into_response()
        }
    }
}

struct TestServer {
    url: String,
    state: ServerState,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn start_test_server(mode: ServerMode) -> TestServer {
    let state = ServerState {
        mode,
        hits: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/submit", post(submit_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr: SocketAddr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test server");
    });

    TestServer {
        url: format!("http://{addr}/submit"),
        state,
        _handle: handle,
    }
}

fn request() -> SubmissionRequest {
    SubmissionRequest {
        submission_id: SubmissionId::generate(),
        keys: vec![AssetKey::new("raw", "events"), AssetKey::new("mart", "daily")],
        plan_fingerprint: "sha256:plan".into(),
        submitted_at: Utc::now(),
    }
}

#[tokio::test]
async fn acknowledgement_carries_external_ref() {
    let server = start_test_server(ServerMode::Acknowledge).await;
    let backend = HttpBackend::new(&server.url).unwrap();
    let request = request();

    let handle = backend.submit(&request).await.unwrap();

    assert_eq!(handle.submission_id, request.submission_id);
    assert_eq!(handle.external_ref.as_deref(), Some("run-42"));
    assert_eq!(server.hits(), 1);
    assert_eq!(server.state.received.lock().unwrap().as_slice(), &[request]);
}

#[tokio::test]
async fn empty_acknowledgement_body_is_accepted() {
    let server = start_test_server(ServerMode::UnavailableOnce).await;
    let backend = HttpBackend::new(&server.url).unwrap();

    let handle = backend.submit(&request()).await.unwrap();

    assert_eq!(handle.external_ref, None);
    // The 503 was retried once.
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn persistent_server_error_gives_up() {
    let server = start_test_server(ServerMode::Fail {
        status: StatusCode::INTERNAL_SERVER_ERROR,
    })
    .await;
    let backend = HttpBackend::new(&server.url).unwrap();

    let err = backend.submit(&request()).await.unwrap_err();

    match err {
        Error::Submission { message } => {
            assert!(message.contains("500"), "unexpected message: {message}");
            assert!(message.contains("executor is down"), "unexpected message: {message}");
        }
        other => panic!("expected a submission error, got {other:?}"),
    }
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = start_test_server(ServerMode::Fail {
        status: StatusCode::BAD_REQUEST,
    })
    .await;
    let backend = HttpBackend::new(&server.url).unwrap();

    let err = backend.submit(&request()).await.unwrap_err();

    assert!(matches!(err, Error::Submission { .. }));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn slow_executor_times_out_without_retry() {
    let server = start_test_server(ServerMode::DelayResponse { millis: 5_000 }).await;
    let backend = HttpBackend::new(&server.url)
        .unwrap()
        .with_request_timeout(Duration::from_millis(200));

    // Outer guard so a missing client timeout fails instead of hanging.
    let result = tokio::time::timeout(Duration::from_secs(3), backend.submit(&request()))
        .await
        .expect("client should time out before the guard");

    match result {
        Err(Error::Submission { message }) => {
            assert!(message.contains("timed out"), "unexpected message: {message}");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(server.hits(), 1);
}
