use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use docdb_client::{
    CancellationToken, ClientConfig, ConsistencyLevel, DocDbClient, DocDbError, DocDbResult,
    ErrorKind, GatewayTransport, MockGateway, MockOutcome, OperationType, Request,
    RequestOptions, ResourceType, Response, SessionTokenStore, headers,
};
use serde_json::json;

const DOC: &str = "dbs/db/colls/c/docs/d1";

fn client_with(gateway: &MockGateway) -> DocDbClient {
    DocDbClient::new(Arc::new(gateway.clone()), ClientConfig::default())
}

fn read_doc() -> Request {
    Request::new(OperationType::Read, ResourceType::Document, DOC)
}

fn with_session(response: Response, token: &str) -> Response {
    response.with_header(headers::SESSION_TOKEN, token)
}

#[tokio::test(flavor = "current_thread")]
async fn captured_token_expected_attached_to_next_read() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({"id": "d1"})), "0:5"));
    gateway.push_response(DOC, Response::ok(json!({"id": "d1"})));
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    client.execute(read_doc(), &cancel).await.unwrap();

    let sent = gateway.requests();
    assert_eq!(sent[0].session_token(), None);
    assert_eq!(sent[1].session_token(), Some("0:5"));
    assert_eq!(
        client.session_store().get("dbs/db/colls/c").unwrap().lsn("0"),
        Some(5)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn older_token_expected_never_regresses_store() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:9"));
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:4,1:2"));
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    client.execute(read_doc(), &cancel).await.unwrap();

    let set = client.session_store().get("dbs/db/colls/c").unwrap();
    assert_eq!(set.lsn("0"), Some(9));
    assert_eq!(set.lsn("1"), Some(2));
}

#[tokio::test(flavor = "current_thread")]
async fn caller_token_and_eventual_override_expected_left_alone() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:5"));
    gateway.push_response(DOC, Response::ok(json!({})));
    gateway.push_response(DOC, Response::ok(json!({})));
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    client
        .execute(read_doc().with_header(headers::SESSION_TOKEN, "0:1"), &cancel)
        .await
        .unwrap();
    let options = RequestOptions {
        consistency_level: Some(ConsistencyLevel::Eventual),
        ..RequestOptions::default()
    };
    client
        .read_resource(ResourceType::Document, DOC, &options, &cancel)
        .await
        .unwrap();

    let sent = gateway.requests();
    assert_eq!(sent[1].session_token(), Some("0:1"));
    assert_eq!(sent[2].session_token(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn collection_delete_expected_session_cleared() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:5"));
    gateway.push_status("dbs/db/colls/c", 204);
    gateway.push_response(DOC, Response::new(404));
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    client
        .delete_resource(
            ResourceType::DocumentCollection,
            "dbs/db/colls/c",
            &RequestOptions::default(),
            &cancel,
        )
        .await
        .unwrap();
    assert!(client.session_store().get("dbs/db/colls/c").is_none());

    let err = client.execute(read_doc(), &cancel).await.unwrap_err();
    assert!(matches!(err, DocDbError::NotFound(_)));
    assert_eq!(gateway.requests()[2].session_token(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_collection_delete_expected_session_kept() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:5"));
    gateway.push_status("dbs/db/colls/c", 412);
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    let err = client
        .delete_resource(
            ResourceType::DocumentCollection,
            "dbs/db/colls/c",
            &RequestOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocDbError::PreconditionFailed(_)));
    assert!(client.session_store().get("dbs/db/colls/c").is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn throttled_twice_then_ok_expected_three_attempts() {
    let gateway = MockGateway::new();
    for _ in 0..2 {
        gateway.push_response(
            DOC,
            Response::new(429).with_header(headers::RETRY_AFTER_MS, "50"),
        );
    }
    gateway.push_response(DOC, Response::ok(json!({"id": "d1"})));
    let client = client_with(&gateway);

    let started = tokio::time::Instant::now();
    let response = client
        .execute(read_doc(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.body, json!({"id": "d1"}));
    assert_eq!(gateway.request_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stale_session_expected_retried_without_token() {
    let gateway = MockGateway::new();
    gateway.push_response(DOC, with_session(Response::ok(json!({})), "0:50"));
    gateway.push_response(
        DOC,
        Response::new(404).with_header(headers::SUB_STATUS, "1002"),
    );
    gateway.push_response(DOC, Response::ok(json!({})));
    let client = client_with(&gateway);
    let cancel = CancellationToken::new();

    client.execute(read_doc(), &cancel).await.unwrap();
    client.execute(read_doc(), &cancel).await.unwrap();

    let sent = gateway.requests();
    assert_eq!(sent[1].session_token(), Some("0:50"));
    assert_eq!(sent[2].session_token(), None);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn transport_failures_past_attempt_budget_expected_retries_exhausted() {
    let gateway = MockGateway::new();
    for _ in 0..5 {
        gateway.push(DOC, MockOutcome::TransportFailure("connection reset".to_string()));
    }
    let mut config = ClientConfig::default();
    config.retry.max_attempts = 3;
    let client = DocDbClient::new(Arc::new(gateway.clone()), config);

    let err = client
        .execute(read_doc(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.attempts(), 3);
    assert!(matches!(err, DocDbError::RetriesExhausted { .. }));
    assert_eq!(gateway.request_count(), 3);
}

/// Transport whose calls never complete.
struct StalledGateway;

#[async_trait]
impl GatewayTransport for StalledGateway {
    async fn execute(&self, _request: &Request) -> DocDbResult<Response> {
        futures::future::pending().await
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stalled_transport_expected_bounded_by_retry_ceiling() {
    let mut config = ClientConfig::default();
    config.retry.max_elapsed_ms = 1_000;
    let client = DocDbClient::new(Arc::new(StalledGateway), config);

    let started = tokio::time::Instant::now();
    let err = client
        .execute(read_doc(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DocDbError::RetriesExhausted { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stalled_transport_cancelled_expected_cancelled_error() {
    let client = DocDbClient::new(Arc::new(StalledGateway), ClientConfig::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let (result, ()) = tokio::join!(client.execute(read_doc(), &cancel), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
}

#[test]
fn concurrent_captures_expected_running_max() {
    let store = Arc::new(SessionTokenStore::new());
    let request = read_doc();

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let store = Arc::clone(&store);
            let request = request.clone();
            thread::spawn(move || {
                for step in 0..200u64 {
                    let lsn = step * 8 + worker;
                    let response = with_session(Response::ok(json!({})), &format!("0:{lsn}"));
                    store.capture(&request, &response).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.get("dbs/db/colls/c").unwrap().lsn("0"), Some(199 * 8 + 7));
}
