mod common;

use common::*;
use pix_reconcile::domain::error::PipelineError;
use pix_reconcile::domain::notification::{EventType, Notification};

fn parse_err(body: &serde_json::Value) -> PipelineError {
    let bytes = serde_json::to_vec(body).unwrap();
    Notification::parse(&bytes, Some("application/json")).unwrap_err()
}

fn fixture() -> serde_json::Value {
    payload(TRANSACTION_RECEIVED, "CODE", 10000, serde_json::json!([]))
}

#[test]
fn parses_transaction_received_fixture() {
    let n = parse(&fixture());

    assert_eq!(n.event(), &EventType::TransactionReceived);
    assert_eq!(n.correlation_id().as_str(), "CODE");
    assert_eq!(n.value().cents(), 10000);
    assert_eq!(n.status(), "CONFIRMED");
    assert_eq!(n.transaction_id(), Some("CODE"));
    assert_eq!(n.end_to_end_id(), Some("Ef6223604800442e9852227415e7b6141"));
    assert!(n.created_at().is_some());
    assert!(n.updated_at().is_some());
    assert!(n.refunds().is_empty());
    assert!(n.refund_entries().is_empty());
}

#[test]
fn unknown_event_is_unhandled_not_an_error() {
    let n = parse(&payload("OPENPIX:CHARGE_EXPIRED", "CODE", 10000, serde_json::json!([])));
    assert_eq!(n.event(), &EventType::Unhandled("OPENPIX:CHARGE_EXPIRED".into()));
    assert!(n.event().is_unhandled());
}

#[test]
fn missing_event_is_malformed() {
    let mut body = fixture();
    body.as_object_mut().unwrap().remove("event");
    assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
}

#[test]
fn missing_pix_block_is_malformed() {
    let mut body = fixture();
    body.as_object_mut().unwrap().remove("pix");
    assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
}

#[test]
fn correlation_id_falls_back_to_transaction_id() {
    let mut body = fixture();
    body.as_object_mut().unwrap().remove("pixQrCode");
    body["pix"]["transactionID"] = serde_json::json!("TX-1");

    let n = parse(&body);
    assert_eq!(n.correlation_id().as_str(), "TX-1");
}

#[test]
fn missing_correlation_id_is_malformed() {
    let mut body = fixture();
    body["pixQrCode"]["correlationID"] = serde_json::json!("   ");
    body["pix"].as_object_mut().unwrap().remove("transactionID");

    let err = parse_err(&body);
    assert!(matches!(err, PipelineError::MalformedPayload(ref m) if m.contains("correlationID")));
}

#[test]
fn missing_value_is_malformed() {
    let mut body = fixture();
    body["pix"].as_object_mut().unwrap().remove("value");
    assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
}

#[test]
fn fractional_value_is_rejected_not_rounded() {
    for value in [serde_json::json!(100.5), serde_json::json!(10000.0)] {
        let mut body = fixture();
        body["pix"]["value"] = value;
        assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
    }
}

#[test]
fn negative_value_is_malformed() {
    let mut body = fixture();
    body["pix"]["value"] = serde_json::json!(-1);
    assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
}

#[test]
fn invalid_json_is_malformed() {
    for body in [&b""[..], b"{", b"not json", b"[]"] {
        let err = Notification::parse(body, Some("application/json")).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)), "{body:?}");
    }
}

#[test]
fn content_type_must_be_json_when_present() {
    let bytes = serde_json::to_vec(&fixture()).unwrap();

    assert!(Notification::parse(&bytes, None).is_ok());
    assert!(Notification::parse(&bytes, Some("application/json; charset=utf-8")).is_ok());
    assert!(Notification::parse(&bytes, Some("Application/JSON")).is_ok());

    for ct in ["text/plain", "application/vnd.openpix+json"] {
        let err = Notification::parse(&bytes, Some(ct)).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)), "{ct}: {err:?}");
    }
}

#[test]
fn refund_entries_take_first_available_identifier() {
    let body = payload(
        TRANSACTION_RECEIVED,
        "CODE",
        10000,
        serde_json::json!([
            {"refundId": "r-1", "correlationID": "c-1", "value": 100},
            {"correlationID": "c-2", "endToEndId": "e-2", "value": 200, "status": "CONFIRMED"},
            {"endToEndId": "e-3", "value": 300, "status": "IN_PROCESSING"},
        ]),
    );
    let n = parse(&body);

    let ids: Vec<&str> = n.refunds().iter().map(|r| r.refund_id.as_str()).collect();
    assert_eq!(ids, ["r-1", "c-2", "e-3"]);
    let settled: Vec<bool> = n.refunds().iter().map(|r| r.is_settled()).collect();
    assert_eq!(settled, [true, true, false]);
}

#[test]
fn refund_without_identifier_is_malformed() {
    let body = payload(
        TRANSACTION_RECEIVED,
        "CODE",
        10000,
        serde_json::json!([{"value": 100}]),
    );
    assert!(matches!(parse_err(&body), PipelineError::MalformedPayload(_)));
}

#[test]
fn refund_event_synthesizes_entry_from_pix_block() {
    let n = parse(&payload(REFUND_RECEIVED, "CODE", 2500, serde_json::json!([])));

    let entries = n.refund_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].refund_id.as_str(), "Ef6223604800442e9852227415e7b6141");
    assert_eq!(entries[0].amount.cents(), 2500);
    assert!(entries[0].is_settled());
}

#[test]
fn unknown_fields_are_ignored() {
    let mut body = fixture();
    body["somethingNew"] = serde_json::json!({"nested": [1, 2, 3]});
    body["pix"]["extra"] = serde_json::json!(true);
    assert_eq!(parse(&body).value().cents(), 10000);
}
