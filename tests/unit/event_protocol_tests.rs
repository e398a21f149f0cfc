use pilot_deck::models::action::{Action, ActionCategory, Decision, ViewerInput};
use pilot_deck::models::event::{parse_command, ControlCommand, Parsed, ServerEvent, ViewerCommand};
use pilot_deck::models::session::SessionPhase;

#[test]
fn control_commands_parse() {
    let cases = [
        (r#"{"type":"pause"}"#, ControlCommand::Pause),
        (r#"{"type":"resume"}"#, ControlCommand::Resume),
        (r#"{"type":"stop"}"#, ControlCommand::Stop),
        (r#"{"type":"ping"}"#, ControlCommand::Ping),
        (
            r#"{"type":"nudge","text":"try the menu"}"#,
            ControlCommand::Nudge {
                text: "try the menu".into(),
            },
        ),
    ];
    for (raw, expected) in cases {
        assert_eq!(
            parse_command::<ControlCommand>(raw, ControlCommand::TYPES),
            Parsed::Command(expected)
        );
    }
}

#[test]
fn extra_fields_are_tolerated() {
    let parsed = parse_command::<ControlCommand>(
        r#"{"type":"pause","reason":"lunch"}"#,
        ControlCommand::TYPES,
    );
    assert_eq!(parsed, Parsed::Command(ControlCommand::Pause));
}

#[test]
fn missing_type_is_malformed() {
    let parsed = parse_command::<ControlCommand>(r#"{"text":"hi"}"#, ControlCommand::TYPES);
    assert!(matches!(parsed, Parsed::Malformed(reason) if reason.contains("type")));
}

#[test]
fn viewer_commands_map_to_inputs() {
    let click =
        parse_command::<ViewerCommand>(r#"{"type":"click","x":5,"y":7}"#, ViewerCommand::TYPES);
    let Parsed::Command(click) = click else {
        panic!("click should parse");
    };
    assert_eq!(click.into_input(), Some(ViewerInput::Click { x: 5, y: 7 }));

    let navigate = ViewerCommand::Navigate {
        url: "https://example.com".into(),
    };
    assert_eq!(
        navigate.into_input(),
        Some(ViewerInput::Navigate {
            url: "https://example.com".into(),
        })
    );
    assert_eq!(ViewerCommand::Ping.into_input(), None);
    assert_eq!(ViewerCommand::Pong.into_input(), None);
}

#[test]
fn control_types_are_not_viewer_types() {
    let parsed = parse_command::<ViewerCommand>(r#"{"type":"pause"}"#, ViewerCommand::TYPES);
    assert_eq!(parsed, Parsed::Unknown("pause".into()));
}

#[test]
fn event_kind_matches_wire_tag() {
    let events = [
        ServerEvent::status(SessionPhase::Running),
        ServerEvent::StepStarted {
            id: 1,
            label: "click".into(),
        },
        ServerEvent::StepCompleted { id: 1 },
        ServerEvent::StepFailed {
            id: 1,
            error: "x".into(),
        },
        ServerEvent::CommandAck {
            command: "click".into(),
            success: true,
        },
        ServerEvent::Ping,
    ];
    for event in events {
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).expect("json");
        assert_eq!(value["type"], event.kind());
    }
}

#[test]
fn action_labels() {
    let click = Action {
        category: ActionCategory::Click,
        target: Some("Sign in".into()),
    };
    assert_eq!(click.label(), "click Sign in");

    let back = Action {
        category: ActionCategory::GoBack,
        target: None,
    };
    assert_eq!(back.label(), "go_back");

    let empty = Action {
        category: ActionCategory::Scroll,
        target: Some(String::new()),
    };
    assert_eq!(empty.label(), "scroll");
}

#[test]
fn decision_parses_from_oracle_json() {
    let decision: Decision = serde_json::from_str(
        r#"{"action":"type","target":"laptops","confidence":8,"rationale":"search box focused"}"#,
    )
    .expect("decision");
    assert_eq!(decision.action, ActionCategory::Type);
    assert_eq!(
        decision.action(),
        Action {
            category: ActionCategory::Type,
            target: Some("laptops".into()),
        }
    );

    let bare: Decision =
        serde_json::from_str(r#"{"action":"done","confidence":10}"#).expect("bare");
    assert!(bare.target.is_none());
    assert!(bare.rationale.is_empty());
}
