use pilot_deck::models::result::{RunOutcome, TaskResult};
use pilot_deck::models::session::{BehaviorOptions, SessionPhase, SessionRequest};

const ALL: [SessionPhase; 8] = [
    SessionPhase::Idle,
    SessionPhase::Starting,
    SessionPhase::Connecting,
    SessionPhase::Running,
    SessionPhase::Paused,
    SessionPhase::Stopped,
    SessionPhase::Complete,
    SessionPhase::Failed,
];

#[test]
fn terminal_phases_admit_no_transition() {
    for from in [SessionPhase::Stopped, SessionPhase::Complete, SessionPhase::Failed] {
        assert!(from.is_terminal());
        for to in ALL {
            assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }
}

#[test]
fn lifecycle_edges() {
    use SessionPhase::{Complete, Connecting, Failed, Idle, Paused, Running, Starting, Stopped};

    let allowed = [
        (Idle, Starting),
        (Starting, Connecting),
        (Starting, Running),
        (Starting, Failed),
        (Connecting, Running),
        (Connecting, Failed),
        (Running, Paused),
        (Running, Stopped),
        (Running, Complete),
        (Running, Failed),
        (Paused, Running),
        (Paused, Stopped),
        (Paused, Failed),
    ];

    for from in ALL {
        for to in ALL {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{from:?} -> {to:?}"
            );
        }
    }
}

#[test]
fn phases_serialize_upper_case() {
    let json = serde_json::to_string(&SessionPhase::Paused).expect("serialize");
    assert_eq!(json, r#""PAUSED""#);
    let parsed: SessionPhase = serde_json::from_str(r#""COMPLETE""#).expect("parse");
    assert_eq!(parsed, SessionPhase::Complete);
}

#[test]
fn request_defaults_when_options_omitted() {
    let request: SessionRequest =
        serde_json::from_str(r#"{"task":"book a table"}"#).expect("parse");

    assert_eq!(request.task, "book a table");
    assert_eq!(request.options, BehaviorOptions::default());
    assert!(request.options.headless);
    assert!(request.options.tools.is_empty());
    assert!(request.session_id.is_none());
}

#[test]
fn resolve_id_prefers_supplied_id() {
    let mut request = SessionRequest::new("task");
    request.session_id = Some("fixed".into());
    assert_eq!(request.resolve_id(), "fixed");

    request.session_id = Some("  ".into());
    let generated = request.resolve_id();
    assert_eq!(generated.len(), 36);
    assert_ne!(generated, request.resolve_id());
}

#[test]
fn finish_builds_summary_and_success() {
    let mut result = TaskResult::empty("s1");
    result.steps = 4;
    result.successful_steps = 3;
    result.data.push(serde_json::json!({ "price": 42 }));

    result.finish(RunOutcome::Completed);
    assert!(result.success);
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(
        result.summary,
        "Completed after 4 step(s); 3 succeeded (75.0%), 1 item(s) extracted"
    );

    result.finish(RunOutcome::StepBudgetExhausted);
    assert!(!result.success);
}

#[test]
fn empty_run_summary_has_zero_rate() {
    let mut result = TaskResult::empty("s2");
    result.finish(RunOutcome::Failed);
    assert!(result.summary.contains("(0.0%)"));
    assert_eq!(result.session_id, "s2");
}
