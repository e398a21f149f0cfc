//! Integration tests for the HTTP session API and health endpoint.

use pilot_deck::models::event::ServerEvent;
use pilot_deck::models::result::{RunOutcome, TaskResult};
use pilot_deck::models::session::SessionPhase;

use super::test_helpers::{
    assert_valid_path, final_result, harness, serve, statuses, test_config, WAIT,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_counts() {
    let h = harness(test_config());
    let server = serve(&h, None).await;

    let response = reqwest::get(server.http("/health")).await.expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["control_connections"], 0);
    assert_eq!(body["viewer_connections"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_list_and_terminate_session() {
    let h = harness(test_config());
    let server = serve(&h, None).await;
    let client = reqwest::Client::new();

    let created = client
        .post(server.http("/sessions"))
        .json(&serde_json::json!({
            "task": "find the cheapest flight",
            "session_id": "s-http",
            "options": { "max_steps": 5, "headless": false }
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(created.status(), reqwest::StatusCode::CREATED);
    let body: serde_json::Value = created.json().await.expect("json");
    assert_eq!(body["session_id"], "s-http");

    let listed: serde_json::Value = client
        .get(server.http("/sessions"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let sessions = listed.as_array().expect("array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], "s-http");
    assert_eq!(sessions[0]["task"], "find the cheapest flight");

    let entry = h.manager.get("s-http").expect("registered");
    assert_eq!(entry.options().max_steps, Some(5));
    assert!(!entry.options().headless);
    assert_ne!(entry.phase(), SessionPhase::Idle);
    drop(entry);

    let stopped = client
        .delete(server.http("/sessions/s-http"))
        .send()
        .await
        .expect("request");
    assert_eq!(stopped.status(), reqwest::StatusCode::ACCEPTED);
    assert!(h.manager.get_control_state("s-http").expect("control").stop_requested());

    h.finish("s-http").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_requests_map_to_client_errors() {
    let mut config = test_config();
    config.max_concurrent_sessions = 1;
    let h = harness(config);
    let server = serve(&h, None).await;
    let client = reqwest::Client::new();

    let blank = client
        .post(server.http("/sessions"))
        .json(&serde_json::json!({ "task": "  " }))
        .send()
        .await
        .expect("request");
    assert_eq!(blank.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = blank.json().await.expect("json");
    assert!(body["error"].as_str().expect("message").contains("task"));

    let missing = client
        .delete(server.http("/sessions/ghost"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let first = client
        .post(server.http("/sessions"))
        .json(&serde_json::json!({ "task": "one", "session_id": "s-full" }))
        .send()
        .await
        .expect("request");
    assert_eq!(first.status(), reqwest::StatusCode::CREATED);

    let second = client
        .post(server.http("/sessions"))
        .json(&serde_json::json!({ "task": "two" }))
        .send()
        .await
        .expect("request");
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    h.finish("s-full").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_answers_with_the_finished_result() {
    let h = harness(test_config());
    h.oracle.gate().open();
    let server = serve(&h, None).await;

    let response = tokio::time::timeout(
        WAIT,
        reqwest::Client::new()
            .post(server.http("/execute"))
            .json(&serde_json::json!({
                "task": "compare laptop prices",
                "session_id": "s-exec",
                "options": { "max_steps": 2 }
            }))
            .send(),
    )
    .await
    .expect("answer before timeout")
    .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let result: TaskResult = response.json().await.expect("task result");
    assert_eq!(result.session_id, "s-exec");
    assert_eq!(result.outcome, RunOutcome::StepBudgetExhausted);
    assert_eq!(result.steps, 2);
    assert_eq!(h.manager.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_rejects_blank_task() {
    let h = harness(test_config());
    let server = serve(&h, None).await;

    let response = reqwest::Client::new()
        .post(server.http("/execute"))
        .json(&serde_json::json!({ "task": "" }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_stream_sends_every_event_then_ends() {
    let h = harness(test_config());
    h.oracle.gate().open();
    let server = serve(&h, None).await;

    let response = reqwest::Client::new()
        .post(server.http("/execute/stream"))
        .json(&serde_json::json!({
            "task": "find the support page",
            "options": { "max_steps": 2 }
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"));

    let body = tokio::time::timeout(WAIT, response.text())
        .await
        .expect("stream ends after final")
        .expect("body");
    let events: Vec<ServerEvent> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("event json"))
        .collect();

    let phases = statuses(&events);
    assert_eq!(phases.first(), Some(&SessionPhase::Starting));
    assert_valid_path(&phases);
    assert!(matches!(events.last(), Some(ServerEvent::Final { .. })));
    let result = final_result(&events);
    assert_eq!(result.outcome, RunOutcome::StepBudgetExhausted);
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, ServerEvent::StepCompleted { .. }))
            .count(),
        2
    );
    assert!(body
        .lines()
        .any(|line| line.strip_prefix("event:").map(str::trim) == Some("step_started")));
}
