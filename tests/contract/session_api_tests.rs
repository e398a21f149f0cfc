//! Wire contract for session creation requests and listings.

use chrono::Utc;
use serde_json::json;

use pilot_deck::models::session::{SessionPhase, SessionRequest, SessionSummary};

#[test]
fn full_request_shape() {
    let request: SessionRequest = serde_json::from_value(json!({
        "task": "compare laptop prices",
        "session_id": "abc",
        "options": {
            "model": "vision-large",
            "tools": ["extract", "screenshot"],
            "headless": false,
            "max_steps": 12,
            "start_url": "https://shop.example.com"
        }
    }))
    .expect("request");

    assert_eq!(request.session_id.as_deref(), Some("abc"));
    assert_eq!(request.options.model.as_deref(), Some("vision-large"));
    assert_eq!(request.options.tools, vec!["extract", "screenshot"]);
    assert!(!request.options.headless);
    assert_eq!(request.options.max_steps, Some(12));
    assert_eq!(request.options.start_url.as_deref(), Some("https://shop.example.com"));
}

#[test]
fn task_is_required() {
    let result = serde_json::from_value::<SessionRequest>(json!({ "options": {} }));
    assert!(result.is_err());
}

#[test]
fn summary_shape() {
    let summary = SessionSummary {
        session_id: "s1".into(),
        task: "t".into(),
        phase: SessionPhase::Paused,
        paused: true,
        stop_requested: false,
        pending_nudges: 2,
        created_at: Utc::now(),
    };
    let value = serde_json::to_value(&summary).expect("json");

    assert_eq!(value["session_id"], "s1");
    assert_eq!(value["phase"], "PAUSED");
    assert_eq!(value["paused"], true);
    assert_eq!(value["stop_requested"], false);
    assert_eq!(value["pending_nudges"], 2);
    assert!(value["created_at"].is_string());
}
