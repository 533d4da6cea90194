use super::*;
use serde_json::json;

#[test]
fn classifies_reply_with_result_and_error() {
    let frame = InboundFrame::decode(r#"{"id": 11, "result": {"ok": true}}"#).expect("json");
    assert_eq!(
        frame,
        InboundFrame::Reply(Reply {
            id: RequestId(11),
            outcome: ReplyOutcome::Result(json!({"ok": true})),
        })
    );

    let frame = InboundFrame::decode(r#"{"id": 12, "error": "no such action"}"#).expect("json");
    assert_eq!(
        frame,
        InboundFrame::Reply(Reply {
            id: RequestId(12),
            outcome: ReplyOutcome::Error(RemoteError::new("no such action")),
        })
    );

    let frame = InboundFrame::decode(r#"{"id": 13}"#).expect("json");
    assert!(matches!(
        frame,
        InboundFrame::Reply(Reply {
            outcome: ReplyOutcome::Empty,
            ..
        })
    ));
}

#[test]
fn decodes_variable_changes_push() {
    let frame = InboundFrame::decode(
        r#"{"event": "variablesChanged", "payload": {"internal": {"time_s": "12"}}}"#,
    )
    .expect("json");
    let InboundFrame::Push(PushEvent::VariablesChanged(batch)) = frame else {
        panic!("expected a variables push, got {frame:?}");
    };
    assert_eq!(batch["internal"]["time_s"], json!("12"));
}

#[test]
fn decodes_control_data_with_string_coordinates() {
    let frame = InboundFrame::classify(json!({
        "event": "controlAdded",
        "payload": {
            "controlId": "bank:1-0-2",
            "location": {"pageNumber": "1", "row": 0, "column": "2"},
            "options": {"pythonClassId": "DemoButton", "iterator": "pagelrtb", "manualIteration": null}
        }
    }));
    let InboundFrame::Push(PushEvent::ControlAdded(control)) = frame else {
        panic!("expected controlAdded, got {frame:?}");
    };
    assert_eq!(control.control_id, ControlId::from("bank:1-0-2"));
    assert_eq!(control.location.page_number, 1);
    assert_eq!(control.location.position(), GridPosition::new(0, 2));
    assert_eq!(control.type_tag(), Some("DemoButton"));
    assert_eq!(control.options.iterator, IteratorMode::RowMajor);
    assert_eq!(control.options.manual_iteration, None);
}

#[test]
fn missing_iterator_defaults_to_manual() {
    let control: ControlData = serde_json::from_value(json!({
        "controlId": "c1",
        "location": {"pageNumber": 2, "row": 1, "column": 1},
        "options": {"controlType": "Fader", "iterator": null, "manualIteration": 4}
    }))
    .expect("control data");
    assert_eq!(control.options.iterator, IteratorMode::Manual);
    assert_eq!(control.options.manual_iteration, Some(4));
}

#[test]
fn known_event_with_bad_payload_is_invalid_push() {
    let frame = InboundFrame::classify(json!({"event": "interaction", "payload": {"event": "press"}}));
    assert!(matches!(frame, InboundFrame::InvalidPush { ref event, .. } if event == "interaction"));
}

#[test]
fn unknown_events_and_bare_errors() {
    let frame = InboundFrame::classify(json!({"event": "pageChanged", "payload": {}}));
    assert!(matches!(frame, InboundFrame::Unrecognized(_)));

    let frame = InboundFrame::classify(json!({"error": "bad request"}));
    assert_eq!(frame, InboundFrame::RemoteError(RemoteError::new("bad request")));

    assert!(InboundFrame::decode("not json").is_err());
}

#[test]
fn interaction_kinds_follow_value() {
    let payload = |event: &str, value: Value| InteractionPayload {
        control_id: ControlId::from("c1"),
        event: event.to_string(),
        value,
    };
    assert_eq!(payload("press", json!(true)).kind(), Some(InteractionKind::Press));
    assert_eq!(payload("press", json!(false)).kind(), Some(InteractionKind::Release));
    assert_eq!(payload("release", Value::Null).kind(), Some(InteractionKind::Release));
    assert_eq!(
        payload("rotate", json!(false)).kind(),
        Some(InteractionKind::Rotate { clockwise: false })
    );
    assert_eq!(payload("hover", json!(true)).kind(), None);
}

#[test]
fn bootstrap_requests_omit_params() {
    let text = serde_json::to_string(&OutboundRequest::query_variables()).expect("serialize");
    assert_eq!(text, r#"{"id":1,"method":"queryVariables"}"#);
    let request = OutboundRequest::new(RequestId(10), RUN_CONNECTION_ACTION, json!({"a": 1}));
    let value = serde_json::to_value(&request).expect("serialize");
    assert_eq!(value, json!({"id": 10, "method": "runConnectionAction", "params": {"a": 1}}));
}
