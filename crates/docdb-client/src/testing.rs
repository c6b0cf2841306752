//! Scripted in-memory gateway for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::errors::{DocDbError, DocDbResult};
use crate::headers;
use crate::links;
use crate::transport::GatewayTransport;
use crate::types::{Request, ResourceType, Response};

/// What the gateway does for one call.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    Respond(Response),
    /// No response reached the client.
    TransportFailure(String),
}

/// Gateway that replays scripted outcomes per request path.
///
/// Outcomes for a path are consumed in order. Feed pages can be keyed by
/// continuation: see [`MockGateway::push_page`]. Every request is recorded.
#[derive(Clone, Debug, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<MockGatewayState>>,
}

#[derive(Debug, Default)]
struct MockGatewayState {
    scripted: BTreeMap<String, VecDeque<MockOutcome>>,
    pages: BTreeMap<(String, String), Response>,
    requests: Vec<Request>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, outcome: MockOutcome) {
        self.inner
            .lock()
            .scripted
            .entry(links::trim_slashes(path).to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn push_response(&self, path: &str, response: Response) {
        self.push(path, MockOutcome::Respond(response));
    }

    pub fn push_status(&self, path: &str, status: u16) {
        self.push_response(path, Response::new(status));
    }

    /// Serves `items` whenever `path` is requested with continuation
    /// `request_continuation` (empty for the first page). The response
    /// carries `next_continuation`, or none when it is empty.
    pub fn push_page(
        &self,
        path: &str,
        resource_type: ResourceType,
        request_continuation: &str,
        items: Vec<Value>,
        next_continuation: &str,
    ) {
        let count = items.len();
        let mut response = Response::ok(json!({
            "_rid": "mock",
            resource_type.feed_key(): items,
            "_count": count,
        }));
        if !next_continuation.is_empty() {
            response = response.with_header(headers::CONTINUATION, next_continuation);
        }
        self.inner.lock().pages.insert(
            (
                links::trim_slashes(path).to_string(),
                request_continuation.to_string(),
            ),
            response,
        );
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }
}

#[async_trait]
impl GatewayTransport for MockGateway {
    async fn execute(&self, request: &Request) -> DocDbResult<Response> {
        let mut state = self.inner.lock();
        state.requests.push(request.clone());

        let path = links::trim_slashes(&request.path).to_string();
        if let Some(outcome) = state
            .scripted
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
        {
            return match outcome {
                MockOutcome::Respond(response) => Ok(response),
                MockOutcome::TransportFailure(message) => {
                    Err(DocDbError::TransientTransport(message))
                }
            };
        }

        let continuation = request.continuation().unwrap_or_default().to_string();
        if let Some(page) = state.pages.get(&(path.clone(), continuation)) {
            return Ok(page.clone());
        }

        Ok(Response::new(404).with_body(json!({
            "code": "NotFound",
            "message": format!("mock gateway has nothing scripted for {path}"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationType;

    #[tokio::test(flavor = "current_thread")]
    async fn scripted_outcomes_expected_consumed_in_order() {
        let gateway = MockGateway::new();
        gateway.push_status("/dbs/db/colls/c/docs/d", 429);
        gateway.push_response("dbs/db/colls/c/docs/d", Response::ok(json!({"id": "d"})));
        let request = Request::new(OperationType::Read, ResourceType::Document, "dbs/db/colls/c/docs/d");

        assert_eq!(gateway.execute(&request).await.unwrap().status, 429);
        assert_eq!(gateway.execute(&request).await.unwrap().body, json!({"id": "d"}));
        assert_eq!(gateway.execute(&request).await.unwrap().status, 404);
        assert_eq!(gateway.request_count(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pages_expected_keyed_by_continuation() {
        let gateway = MockGateway::new();
        gateway.push_page("dbs/db/colls/c/docs", ResourceType::Document, "", vec![json!(1)], "c1");
        gateway.push_page("dbs/db/colls/c/docs", ResourceType::Document, "c1", vec![json!(2)], "");

        let first = Request::new(OperationType::ReadFeed, ResourceType::Document, "dbs/db/colls/c/docs");
        let response = gateway.execute(&first).await.unwrap();
        assert_eq!(response.continuation(), Some("c1"));

        let second = first.with_header(headers::CONTINUATION, "c1");
        let response = gateway.execute(&second).await.unwrap();
        assert_eq!(response.continuation(), None);
        assert_eq!(response.feed_items(ResourceType::Document).unwrap(), vec![json!(2)]);
    }
}
