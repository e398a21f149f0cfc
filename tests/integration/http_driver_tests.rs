//! Integration tests for the HTTP oracle and browser sidecar clients.
//!
//! A small axum app stands in for both sidecars. Driver calls are blocking,
//! so every call goes through `spawn_blocking` the way the worker and the
//! frame streamer make them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use pilot_deck::config::{BrowserConfig, OracleConfig};
use pilot_deck::driver::http_browser::HttpBrowserLauncher;
use pilot_deck::driver::http_oracle::HttpOracle;
use pilot_deck::driver::{DecisionOracle, ResourceLauncher};
use pilot_deck::models::action::{
    Action, ActionCategory, DecisionInput, Perception, ViewerInput,
};
use pilot_deck::models::session::BehaviorOptions;
use pilot_deck::AppError;

#[derive(Default)]
struct Calls {
    launches: AtomicUsize,
    acks: AtomicUsize,
    inputs: AtomicUsize,
    deletes: AtomicUsize,
}

async fn mock_sidecar(calls: Arc<Calls>) -> String {
    let launches = Arc::clone(&calls);
    let acks = Arc::clone(&calls);
    let inputs = Arc::clone(&calls);
    let deletes = Arc::clone(&calls);

    let app = Router::new()
        .route(
            "/decide",
            post(|Json(input): Json<serde_json::Value>| async move {
                let confidence = if input["task"] == "overconfident" { 11 } else { 8 };
                Json(json!({
                    "action": "click",
                    "target": format!("step {}", input["step"]),
                    "confidence": confidence,
                    "rationale": "button is visible"
                }))
            }),
        )
        .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/sessions",
            post(move || async move {
                launches.launches.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/sessions/{id}/perception",
            get(|Path(id): Path<String>| async move {
                Json(json!({
                    "url": format!("https://example.com/{id}"),
                    "title": "Example",
                    "elements": ["[1] Search"]
                }))
            }),
        )
        .route(
            "/sessions/{id}/frame",
            get(|| async {
                Json(json!({ "ack_id": 41, "data": "aGk=", "url": "https://example.com/live" }))
            }),
        )
        .route(
            "/sessions/{id}/frame/ack",
            post(move |Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["ack_id"], 41);
                acks.acks.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/sessions/{id}/action",
            post(|Json(action): Json<Action>| async move {
                let success = action.category != ActionCategory::GoBack;
                Json(json!({ "success": success, "message": action.label() }))
            }),
        )
        .route(
            "/sessions/{id}/input",
            post(move |Json(_input): Json<ViewerInput>| async move {
                inputs.inputs.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/sessions/{id}/url",
            get(|| async { Json(json!({ "url": "https://example.com/final" })) }),
        )
        .route(
            "/sessions/{id}",
            delete(move || async move {
                deletes.deletes.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn input(task: &str) -> DecisionInput {
    DecisionInput {
        task: task.into(),
        step: 2,
        perception: Perception::default(),
        history: Vec::new(),
        nudges: vec!["look for a search box".into()],
        stuck_hint: None,
        model: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oracle_posts_input_and_parses_decision() {
    let base = mock_sidecar(Arc::new(Calls::default())).await;
    let oracle = Arc::new(
        HttpOracle::new(&OracleConfig {
            endpoint: format!("{base}/decide"),
            timeout_seconds: 5,
        })
        .expect("oracle"),
    );

    let decision = tokio::task::spawn_blocking(move || oracle.decide(&input("find flights")))
        .await
        .expect("join")
        .expect("decision");

    assert_eq!(decision.action, ActionCategory::Click);
    assert_eq!(decision.target.as_deref(), Some("step 2"));
    assert_eq!(decision.confidence, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oracle_failures_are_oracle_errors() {
    let base = mock_sidecar(Arc::new(Calls::default())).await;
    let broken = Arc::new(
        HttpOracle::new(&OracleConfig {
            endpoint: format!("{base}/broken"),
            timeout_seconds: 5,
        })
        .expect("oracle"),
    );
    let sane = Arc::new(
        HttpOracle::new(&OracleConfig {
            endpoint: format!("{base}/decide"),
            timeout_seconds: 5,
        })
        .expect("oracle"),
    );

    let failed = tokio::task::spawn_blocking(move || broken.decide(&input("x")))
        .await
        .expect("join");
    assert!(matches!(failed, Err(AppError::Oracle(_))));

    let out_of_range = tokio::task::spawn_blocking(move || sane.decide(&input("overconfident")))
        .await
        .expect("join");
    assert!(matches!(out_of_range, Err(AppError::Oracle(message)) if message.contains("11")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn browser_resource_round_trips_every_primitive() {
    let calls = Arc::new(Calls::default());
    let base = mock_sidecar(Arc::clone(&calls)).await;
    let launcher = HttpBrowserLauncher::new(&BrowserConfig {
        endpoint: format!("{base}/"),
        timeout_seconds: 5,
    })
    .expect("launcher");

    tokio::task::spawn_blocking(move || {
        let browser = launcher
            .launch("s1", &BehaviorOptions::default())
            .expect("launch");

        let perception = browser.perceive().expect("perceive");
        assert_eq!(perception.url, "https://example.com/s1");
        assert_eq!(perception.elements, vec!["[1] Search".to_owned()]);

        let frame = browser.capture_frame().expect("capture");
        assert_eq!(frame.ack_id, 41);
        assert_eq!(frame.data.as_ref(), b"hi");
        browser.acknowledge_frame(frame.ack_id).expect("ack");

        let click = Action {
            category: ActionCategory::Click,
            target: Some("Search".into()),
        };
        let outcome = browser.apply_action(&click).expect("action");
        assert!(outcome.success);
        assert_eq!(outcome.message, "click Search");

        let back = Action {
            category: ActionCategory::GoBack,
            target: None,
        };
        assert!(!browser.apply_action(&back).expect("soft failure").success);

        browser
            .apply_input(&ViewerInput::Scroll { delta: 300 })
            .expect("input");
        assert_eq!(browser.current_url().expect("url"), "https://example.com/final");

        browser.close().expect("close");
        browser.close().expect("close is idempotent");
        assert!(matches!(browser.perceive(), Err(AppError::Resource(_))));
        assert!(matches!(browser.capture_frame(), Err(AppError::Streaming(_))));
    })
    .await
    .expect("join");

    assert_eq!(calls.launches.load(Ordering::SeqCst), 1);
    assert_eq!(calls.acks.load(Ordering::SeqCst), 1);
    assert_eq!(calls.inputs.load(Ordering::SeqCst), 1);
    assert_eq!(calls.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_sidecar_fails_launch() {
    let launcher = HttpBrowserLauncher::new(&BrowserConfig {
        endpoint: "http://127.0.0.1:9".into(),
        timeout_seconds: 2,
    })
    .expect("launcher");

    let outcome = tokio::task::spawn_blocking(move || {
        launcher.launch("s1", &BehaviorOptions::default()).map(|_| ())
    })
    .await
    .expect("join");
    assert!(matches!(outcome, Err(AppError::Resource(_))));
}
