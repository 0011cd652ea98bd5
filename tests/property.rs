mod common;

use std::sync::Arc;
use std::time::Duration;

use eagleview::{
    Client, Environment, Error, ManualClock, MemoryTokenStore, PropertyRequest, PropertyTarget,
    RequestStatus, ValidationError,
};
use serde_json::json;

use common::{ScriptedTransport, client, client_with, long_sleeps, settings};

const INSIDE: (f64, f64) = (41.25, -95.99);
const OUTSIDE: (f64, f64) = (40.7128, -74.0060);

fn accepted(id: &str) -> serde_json::Value {
    json!({"request": {"id": id, "status": "Submitted"}})
}

#[test]
fn submit_returns_the_service_request_id() {
    let transport = ScriptedTransport::new();
    transport.push_json(202, accepted("req-1"));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let request = client
        .submit(&PropertyTarget::coordinates(INSIDE.0, INSIDE.1))
        .expect("accepted");

    assert_eq!(request.request_id(), "req-1");
    assert_eq!(request.status(), RequestStatus::Submitted);

    let sent = &transport.api_requests()[0];
    assert!(sent.url.ends_with("/property/v2/request"));
    assert_eq!(
        sent.body,
        Some(eagleview::RequestBody::Json(
            json!({"coordinates": {"lat": INSIDE.0, "lon": INSIDE.1}})
        ))
    );
}

#[test]
fn numeric_and_top_level_ids_are_accepted() {
    let transport = ScriptedTransport::new();
    transport
        .push_json(202, json!({"id": 42}))
        .push_json(202, json!({"request": {}}));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let target = PropertyTarget::address("3102 Farnam St, Omaha, NE");

    assert_eq!(client.submit(&target).expect("numeric id").request_id(), "42");
    assert!(matches!(client.submit(&target), Err(Error::Api(_))));
}

#[test]
fn out_of_sandbox_coordinates_never_reach_the_network() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let err = client
        .submit(&PropertyTarget::coordinates(OUTSIDE.0, OUTSIDE.1))
        .expect_err("outside the sandbox");

    assert!(matches!(
        err,
        Error::Validation(ValidationError::OutOfBounds { .. })
    ));
    assert!(transport.requests().is_empty());
}

#[test]
fn empty_address_is_rejected_locally() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let err = client
        .submit(&PropertyTarget::address("   "))
        .expect_err("blank address");

    assert!(matches!(err, Error::Validation(ValidationError::EmptyAddress)));
    assert!(transport.requests().is_empty());
}

#[test]
fn bounds_are_skipped_when_validation_is_off_or_in_production() {
    let clock = Arc::new(ManualClock::default());
    let target = PropertyTarget::coordinates(OUTSIDE.0, OUTSIDE.1);

    let transport = ScriptedTransport::new();
    transport.push_json(202, accepted("a"));
    let relaxed = client_with(
        settings().with_validate_coordinates(false),
        &transport,
        &clock,
        Box::new(MemoryTokenStore::new()),
    );
    assert!(relaxed.submit(&target).is_ok());

    let mut production = settings();
    production.environment = Environment::Production;
    let transport = ScriptedTransport::new();
    transport.push_json(202, accepted("b"));
    let production = client_with(
        production,
        &transport,
        &clock,
        Box::new(MemoryTokenStore::new()),
    );
    assert!(production.submit(&target).is_ok());
    assert!(production.validate_coordinates(91.0, 0.0).is_err());
}

#[test]
fn submit_requires_accepted_status() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, accepted("nope"));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let err = client
        .submit(&PropertyTarget::coordinates(INSIDE.0, INSIDE.1))
        .expect_err("200 is not an acceptance");

    assert_eq!(err.status(), Some(200));
}

#[test]
fn batch_records_failures_and_continues() {
    let transport = ScriptedTransport::new();
    transport
        .push_json(202, accepted("first"))
        .push_status(400)
        .push_status(400)
        .push_status(400)
        .push_json(202, accepted("third"));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let targets = [
        PropertyTarget::coordinates(INSIDE.0, INSIDE.1),
        PropertyTarget::address("bad"),
        PropertyTarget::coordinates(41.245, -95.98),
    ];
    let items = client.submit_many(&targets);

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].request().map(PropertyRequest::request_id), Some("first"));
    assert_eq!(items[1].outcome.as_ref().err().and_then(Error::status), Some(400));
    assert_eq!(items[1].target, targets[1]);
    assert_eq!(items[2].request().map(PropertyRequest::request_id), Some("third"));
    assert_eq!(
        long_sleeps(&clock),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn poll_waits_until_complete() {
    let transport = ScriptedTransport::new();
    transport
        .push_json(202, json!({"status": "In Progress"}))
        .push_json(200, json!({"status": "Complete", "property": {"id": 7}}));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let target = PropertyTarget::coordinates(INSIDE.0, INSIDE.1);
    let mut request = PropertyRequest::submitted(target, "r1");

    let status = client.poll(&mut request).expect("poll");

    assert_eq!(status, RequestStatus::Complete);
    assert_eq!(request.polls(), 2);
    assert_eq!(request.payload().and_then(|p| p.pointer("/property/id")), Some(&json!(7)));
    assert_eq!(long_sleeps(&clock), vec![Duration::from_secs(30)]);
}

#[test]
fn poll_budget_exhaustion_keeps_the_last_payload() {
    let transport = ScriptedTransport::new();
    transport.repeat(eagleview::HttpResponse::json_body(
        202,
        &json!({"status": "In Progress"}),
    ));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "slow");

    let status = client.poll(&mut request).expect("exhaustion is not an error");

    assert_eq!(status, RequestStatus::Unknown);
    assert!(request.payload().is_some());
    assert_eq!(request.polls(), 10);
    assert_eq!(transport.api_requests().len(), 10);
    assert_eq!(long_sleeps(&clock), vec![Duration::from_secs(30); 9]);
}

#[test]
fn poll_without_any_payload_fails() {
    let transport = ScriptedTransport::new();
    transport.repeat(eagleview::HttpResponse::new(404, ""));
    let clock = Arc::new(ManualClock::default());
    let client = client_with(
        settings().with_polling(Duration::from_secs(5), 3),
        &transport,
        &clock,
        Box::new(MemoryTokenStore::new()),
    );
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "gone");

    assert_eq!(client.poll(&mut request).expect("poll"), RequestStatus::Failed);
    assert_eq!(transport.api_requests().len(), 3);
    assert_eq!(long_sleeps(&clock), vec![Duration::from_secs(5); 2]);
}

#[test]
fn failed_status_ends_polling() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, json!({"request": {"status": "Failed"}}));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "bad");

    assert_eq!(client.poll(&mut request).expect("poll"), RequestStatus::Failed);
    assert_eq!(request.polls(), 1);
}

#[test]
fn server_errors_while_polling_count_as_empty_polls() {
    let transport = ScriptedTransport::new();
    transport
        .push_status(500)
        .push_status(500)
        .push_status(500)
        .push_json(200, json!({"status": "Complete"}));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "flaky");

    assert_eq!(client.poll(&mut request).expect("poll"), RequestStatus::Complete);
    assert_eq!(request.polls(), 2);
}

#[test]
fn completed_requests_are_not_polled_again() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, json!({"status": "Complete"}));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "done");

    client.poll(&mut request).expect("first poll");
    client.poll(&mut request).expect("second poll");

    assert_eq!(transport.api_requests().len(), 1);
    assert_eq!(request.polls(), 1);
}

#[test]
fn completed_results_are_served_from_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::default());
    let build = |transport: &Arc<ScriptedTransport>| {
        Client::builder(settings())
            .transport(transport.clone())
            .clock(clock.clone())
            .token_store(Box::new(MemoryTokenStore::new()))
            .cache_dir(dir.path())
            .progress(false)
            .build()
            .expect("client")
    };

    let transport = ScriptedTransport::new();
    transport.push_json(200, json!({"status": "Complete", "roof": {"pitch": 6}}));
    let mut first = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "cached");
    build(&transport).poll(&mut first).expect("poll");

    let transport = ScriptedTransport::new();
    let mut second = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "cached");
    let status = build(&transport).poll(&mut second).expect("cache hit");

    assert_eq!(status, RequestStatus::Complete);
    assert_eq!(second.payload(), first.payload());
    assert!(transport.requests().is_empty());
}

#[test]
fn auth_failures_abort_polling() {
    let transport = ScriptedTransport::new();
    transport.reject_tokens(400, r#"{"error":"invalid_client"}"#);
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);
    let mut request = PropertyRequest::submitted(PropertyTarget::address("1 Main St"), "r");

    let err = client.poll(&mut request).expect_err("auth failure");

    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(request.polls(), 1);
}
