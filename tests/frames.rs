use assert_matches::assert_matches;
use graphql_ws_engine::{
    graphql::{GraphqlError, Request},
    protocol::{
        decode_client_message, decode_server_message, is_close_echo, sniff, ClientMessage,
        ConnectionInit, FrameKind, ServerMessage,
    },
    ProtocolError,
};
use serde_json::json;

// Decode-then-encode must reproduce the canonical wire text: exact `type`
// spellings, declared field order, and absent optionals omitted rather than
// nulled.

#[test]
fn client_frames_round_trip_to_canonical_json() {
    let canonical = [
        r#"{"type":"connection_init"}"#,
        r#"{"type":"connection_init","payload":{"token":"sesame"}}"#,
        r#"{"type":"subscribe","id":"op-1","payload":{"query":"query { hello }"}}"#,
        r#"{"type":"subscribe","id":"op-2","payload":{"query":"query Q($a: Int) { hello }","variables":{"a":1},"operationName":"Q"}}"#,
        r#"{"type":"complete","id":"op-1"}"#,
        r#"{"type":"next","id":"push-1","payload":{"data":{"tally":7}}}"#,
    ];

    for text in canonical {
        let message = decode_client_message(text).unwrap();
        assert_eq!(serde_json::to_string(&message).unwrap(), text);
    }
}

#[test]
fn server_frames_round_trip_to_canonical_json() {
    let canonical = [
        r#"{"type":"connection_ack"}"#,
        r#"{"type":"connection_ack","payload":{"region":"eu"}}"#,
        r#"{"type":"next","id":"sub-1","payload":{"data":{"serial":1}}}"#,
        r#"{"type":"error","id":"sub-1","payload":[{"message":"first"},{"message":"second","locations":[{"line":1,"column":2}]},{"message":"third"}]}"#,
        r#"{"type":"complete","id":"sub-1"}"#,
    ];

    for text in canonical {
        let message = decode_server_message(text).unwrap();
        assert_eq!(serde_json::to_string(&message).unwrap(), text);
    }
}

#[test]
fn error_payload_order_is_preserved() {
    let text = r#"{"type":"error","id":"sub-1","payload":[{"message":"z"},{"message":"a"},{"message":"m"}]}"#;
    let message = decode_server_message(text).unwrap();

    let ServerMessage::Error { payload, .. } = message else {
        panic!("expected an error frame");
    };
    let messages: Vec<_> = payload.iter().map(|error| error.message.as_str()).collect();
    assert_eq!(messages, vec!["z", "a", "m"]);
}

#[test]
fn unset_payloads_are_omitted_not_nulled() {
    let init = ClientMessage::ConnectionInit { payload: None };
    assert_eq!(
        serde_json::to_string(&init).unwrap(),
        r#"{"type":"connection_init"}"#
    );

    let ack = ServerMessage::ConnectionAck { payload: None };
    assert_eq!(
        serde_json::to_string(&ack).unwrap(),
        r#"{"type":"connection_ack"}"#
    );

    let request = Request::new("{ hello }");
    let subscribe = ClientMessage::Subscribe {
        id: "1".into(),
        payload: request,
    };
    assert!(!serde_json::to_string(&subscribe).unwrap().contains("null"));
}

#[test]
fn typed_connection_init_serializes_like_the_untyped_one() {
    #[derive(serde::Serialize)]
    struct Token {
        token: &'static str,
    }

    let typed = ConnectionInit::new(Some(Token { token: "sesame" }));
    assert_eq!(
        serde_json::to_string(&typed).unwrap(),
        r#"{"type":"connection_init","payload":{"token":"sesame"}}"#
    );

    let empty = ConnectionInit::<()>::new(None);
    assert_eq!(
        serde_json::to_string(&empty).unwrap(),
        r#"{"type":"connection_init"}"#
    );
}

#[test]
fn the_envelope_pass_triages_before_the_variant_pass() {
    assert_matches!(sniff(r#"{"type":"subscribe"}"#), Ok(FrameKind::Subscribe));
    assert_matches!(sniff(r#"{"type":"ping"}"#), Ok(FrameKind::Unknown));
    assert_matches!(sniff(r#"{"id":"1"}"#), Err(ProtocolError::NoType));
    assert_matches!(sniff("not even json"), Err(ProtocolError::InvalidEncoding));
}

#[test]
fn variant_decode_failures_name_the_frame_kind() {
    let error = decode_client_message(r#"{"type":"subscribe","id":"1"}"#).unwrap_err();
    assert_eq!(error, ProtocolError::InvalidRequestFormat(FrameKind::Subscribe));
    assert_eq!(error.to_string(), "4400: invalid subscribe request");
    assert_eq!(error.close_code(), 4400);

    let error = decode_server_message(r#"{"type":"next","id":5}"#).unwrap_err();
    assert_eq!(error, ProtocolError::InvalidResponseFormat(FrameKind::Next));
    assert_eq!(error.to_string(), "4400: invalid next response");
}

#[test]
fn frames_only_decode_in_their_own_direction() {
    // connection_ack travels server → client.
    assert_matches!(
        decode_client_message(r#"{"type":"connection_ack"}"#),
        Err(ProtocolError::InvalidType)
    );
    // subscribe travels client → server.
    assert_matches!(
        decode_server_message(r#"{"type":"subscribe","id":"1","payload":{"query":"{ x }"}}"#),
        Err(ProtocolError::InvalidType)
    );
    // error frames only ever travel server → client.
    assert_matches!(
        decode_client_message(r#"{"type":"error","id":"1","payload":[]}"#),
        Err(ProtocolError::InvalidType)
    );
}

#[test]
fn close_echo_detection_only_matches_the_leading_pair() {
    assert!(is_close_echo("4400: Invalid message"));
    assert!(is_close_echo("4429: too many initialisation requests"));
    assert!(!is_close_echo(r#"{"type":"next"}"#));
    assert!(!is_close_echo("4: nope"));
    assert!(!is_close_echo(" 4400"));
}

#[test]
fn every_protocol_error_carries_its_close_code_in_the_text() {
    let errors = [
        ProtocolError::NoType,
        ProtocolError::InvalidType,
        ProtocolError::InvalidEncoding,
        ProtocolError::InvalidRequestFormat(FrameKind::Subscribe),
        ProtocolError::InvalidResponseFormat(FrameKind::Next),
        ProtocolError::Unauthorized,
        ProtocolError::NotInitialized,
        ProtocolError::SubscriberAlreadyExists("sub-1".into()),
        ProtocolError::TooManyInitRequests,
        ProtocolError::InternalStreamIssue,
        ProtocolError::Graphql("the source died".into()),
    ];

    for error in errors {
        let code = error.close_code();
        assert!(
            error.to_string().starts_with(&format!("{code}: ")),
            "{error} does not lead with {code}"
        );
    }
    assert_eq!(ProtocolError::Unauthorized.to_string(), "4401: Unauthorized");
    assert_eq!(ProtocolError::SubscriberAlreadyExists("x".into()).close_code(), 4409);
    assert_eq!(ProtocolError::TooManyInitRequests.close_code(), 4429);
    assert_eq!(ProtocolError::InternalStreamIssue.close_code(), 4500);
}

#[test]
fn graphql_errors_keep_unrecognised_structure_out_but_fields_in() {
    let error: GraphqlError = serde_json::from_value(json!({
        "message": "boom",
        "path": ["books", 0, "id"],
        "extensions": { "code": "DOWNSTREAM" }
    }))
    .unwrap();

    assert_eq!(error.message, "boom");
    assert_eq!(error.path.as_ref().unwrap().len(), 3);
    assert_eq!(error.extensions.as_ref().unwrap()["code"], "DOWNSTREAM");
}
